//! # couchnet
//!
//! HTTP transport for CouchDB-style document databases.
//!
//! `couchnet` sends requests over pooled keep-alive HTTP/1.1 connections,
//! revalidates cached GET responses with `If-None-Match`, hands out
//! single-pass response bodies (with chunked decoding for change feeds) and
//! bounds every connect, read and write with one configured timeout.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use couchnet::Session;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), couchnet::NetError> {
//!     let mut session = Session::builder()
//!         .base_url("http://localhost:5984/")
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     let (status, _headers, mut body) = session
//!         .get("db/_changes?feed=longpoll", Default::default())
//!         .await?
//!         .into_parts();
//!     println!("{status}: {:?}", body.read(None).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and load states
//! - [`config`] - Session configuration
//! - [`http`] - Wire codec, response bodies, cache and transactions
//! - [`resource`] - URL-quoting helper over a shared session
//! - [`session`] - The request entry point
//! - [`socket`] - Connection setup, pooling and timeouts
//!
//! ## Features
//!
//! - `json` (default): JSON convenience calls on [`Resource`]
//! - `tls`: HTTPS through BoringSSL

pub mod base;
pub mod config;
pub mod http;
pub mod resource;
pub mod session;
pub mod socket;

pub use crate::base::neterror::{ErrorDetail, ErrorKind, NetError};
pub use crate::config::SessionConfig;
pub use crate::http::{
    CacheEntry, CacheLimits, Credentials, HttpCache, HttpResponse, RequestBody, ResponseBody,
};
pub use crate::resource::Resource;
pub use crate::session::{Session, SessionBuilder};
