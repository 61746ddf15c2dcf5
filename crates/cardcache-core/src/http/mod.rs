//! Request and response types passed between the proxy, the cache and the network.
//!
//! `Response` bodies are consumed once. Handing the same response to both the
//! cache and the caller requires an explicit `Response::tee`.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;
