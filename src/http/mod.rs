//! HTTP/1.1 exchange layer.
//!
//! - [`h1`]: request serialization and response head parsing
//! - [`chunked`]: `Transfer-Encoding: chunked` decoder
//! - [`responsebody`]: single-pass response bodies that hand connections back
//! - [`httpcache`]: ETag revalidation cache
//! - [`transaction`]: connect, send and read the head, with retries

pub mod auth;
pub mod chunked;
pub mod h1;
pub mod httpcache;
pub mod requestbody;
pub mod response;
pub mod responsebody;
pub mod retry;
pub mod streamfactory;
pub mod transaction;

// Re-exports for convenience
pub use auth::Credentials;
pub use chunked::ChunkedDecoder;
pub use httpcache::{CacheEntry, CacheLimits, HttpCache};
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use responsebody::{Framing, Release, ResponseBody};
