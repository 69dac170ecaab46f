/// Per-request cache decision, produced by the Cache Policy Engine (§4.E)
/// and refinable by a module's `cache_policy` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub allow_cache: bool,
    pub allow_store: bool,
    pub require_revalidate: bool,
}

impl CachePolicy {
    pub const DENY: CachePolicy = CachePolicy {
        allow_cache: false,
        allow_store: false,
        require_revalidate: false,
    };

    pub const TTL_ONLY: CachePolicy = CachePolicy {
        allow_cache: true,
        allow_store: true,
        require_revalidate: false,
    };

    pub const REVALIDATE: CachePolicy = CachePolicy {
        allow_cache: true,
        allow_store: true,
        require_revalidate: true,
    };
}

/// Parsed `WWW-Authenticate: Bearer realm="...",service="...",scope="..."`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a `WWW-Authenticate` header value. Returns `None` if the
    /// scheme isn't (case-insensitively) `Bearer`.
    pub fn parse(header_value: &str) -> Option<BearerChallenge> {
        let trimmed = header_value.trim();
        let rest = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| {
                if trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("bearer") {
                    trimmed.get(6..)
                } else {
                    None
                }
            })?
            .trim_start();

        let mut challenge = BearerChallenge::default();
        for part in split_params(rest) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = Some(value.to_string()),
                "service" => challenge.service = Some(value.to_string()),
                "scope" => challenge.scope = Some(value.to_string()),
                _ => {}
            }
        }
        Some(challenge)
    }

    /// Token endpoint URL: `realm?service=<s>&scope=<c>`, omitting empty
    /// params, or `None` when `realm` is absent.
    pub fn token_url(&self) -> Option<String> {
        let realm = self.realm.as_ref()?;
        let mut query = Vec::new();
        if let Some(service) = &self.service {
            if !service.is_empty() {
                query.push(format!("service={}", urlencode(service)));
            }
        }
        if let Some(scope) = &self.scope {
            if !scope.is_empty() {
                query.push(format!("scope={}", urlencode(scope)));
            }
        }
        if query.is_empty() {
            Some(realm.clone())
        } else {
            let sep = if realm.contains('?') { '&' } else { '?' };
            Some(format!("{realm}{sep}{}", query.join("&")))
        }
    }
}

/// Split comma-separated `key=value` params while respecting quoted commas.
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_bearer_scheme() {
        assert!(BearerChallenge::parse(r#"Basic realm="x""#).is_none());
    }

    #[test]
    fn parse_extracts_quoted_params() {
        let c = BearerChallenge::parse(
            r#"Bearer realm="http://reg/token",service="registry.test",scope="repository:library/alpine:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm.as_deref(), Some("http://reg/token"));
        assert_eq!(c.service.as_deref(), Some("registry.test"));
        assert_eq!(
            c.scope.as_deref(),
            Some("repository:library/alpine:pull")
        );
    }

    #[test]
    fn parse_is_case_insensitive_on_scheme() {
        assert!(BearerChallenge::parse(r#"bearer realm="x""#).is_some());
        assert!(BearerChallenge::parse(r#"BEARER realm="x""#).is_some());
    }

    #[test]
    fn token_url_omits_empty_params() {
        let c = BearerChallenge {
            realm: Some("http://reg/token".into()),
            service: Some("registry.test".into()),
            scope: None,
        };
        assert_eq!(
            c.token_url().unwrap(),
            "http://reg/token?service=registry.test"
        );
    }

    #[test]
    fn token_url_none_without_realm() {
        let c = BearerChallenge {
            realm: None,
            service: Some("x".into()),
            scope: None,
        };
        assert!(c.token_url().is_none());
    }
}
