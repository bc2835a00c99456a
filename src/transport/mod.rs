pub mod client_cache;
pub mod http_transport;

pub use client_cache::ClientCache;
pub use http_transport::{build_upstream_url, HttpTransport};
