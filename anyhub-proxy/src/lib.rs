pub mod auth;
pub mod context;
pub mod engine;
pub mod headers;
pub mod proxy;

pub use context::ServerContext;
pub use proxy::{handle, ProxyRequest};
