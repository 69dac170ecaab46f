use sha1::{Digest, Sha1};

/// Opaque key into the disk store: `{tenant_name, path}`.
///
/// `path` is always the cleaned, tenant-root-scoped result of
/// `clean("/" + input)`, with module rewrites and an optional
/// `/__qs/<hex-sha1(raw_query)>` suffix already folded in. Two distinct
/// wire requests that share cache semantics must produce identical
/// locators — see invariant 2 in spec §8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub tenant_name: String,
    pub path: String,
}

impl Locator {
    pub fn new(tenant_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tenant_name: tenant_name.into(),
            path: path.into(),
        }
    }

    /// `tenant + "::" + path` — the key used by the disk store's per-locator
    /// write lock table and by the ETag / Composer dist registries.
    pub fn key(&self) -> String {
        format!("{}::{}", self.tenant_name, self.path)
    }
}

/// Clean a raw request path into an absolute, `..`-free path rooted at `/`.
///
/// Mirrors Go's `path.Clean("/" + p)`: collapses `//`, resolves `.`/`..`
/// segments, and never produces a path that climbs above `/`. An attempt to
/// escape (e.g. `/../../etc/passwd`) collapses to `/` rather than erroring,
/// matching the boundary behavior in spec §8 ("never escape tenant root").
pub fn clean_path(raw: &str) -> String {
    let prefixed = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };

    let mut stack: Vec<&str> = Vec::new();
    for segment in prefixed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }

    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// `/__qs/<hex-sha1(raw_query)>` suffix, or the bare path when the query is
/// empty or absent. A present-but-zero-byte query string is treated
/// identically to an absent one (spec §8 boundary behavior).
pub fn fold_query(path: &str, raw_query: Option<&str>) -> String {
    match raw_query {
        Some(q) if !q.is_empty() => {
            let mut hasher = Sha1::new();
            hasher.update(q.as_bytes());
            let digest = hasher.finalize();
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            let trimmed = path.trim_end_matches('/');
            format!("{trimmed}/__qs/{hex}")
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_handles_dotdot_and_double_slash() {
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("//"), "/");
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/a//b/./c"), "/a/b/c");
        assert_eq!(clean_path("/a/../../b"), "/b");
    }

    #[test]
    fn clean_path_never_escapes_root() {
        for p in ["/..", "/../..", "/a/b/../../../.."] {
            let cleaned = clean_path(p);
            assert!(cleaned.starts_with('/'));
            assert!(!cleaned.contains(".."));
        }
    }

    #[test]
    fn fold_query_absent_vs_empty_are_identical() {
        let absent = fold_query("/pkg", None);
        let empty = fold_query("/pkg", Some(""));
        assert_eq!(absent, empty);
        assert_eq!(absent, "/pkg");
    }

    #[test]
    fn fold_query_is_deterministic() {
        let a = fold_query("/pkg", Some("x=1"));
        let b = fold_query("/pkg", Some("x=1"));
        assert_eq!(a, b);
        assert!(a.contains("/__qs/"));
        assert_ne!(a, fold_query("/pkg", Some("x=2")));
    }

    #[test]
    fn locator_key_joins_tenant_and_path() {
        let l = Locator::new("acme", "/pkg/package.json");
        assert_eq!(l.key(), "acme::/pkg/package.json");
    }
}
