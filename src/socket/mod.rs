//! Socket and connection management.
//!
//! - [`pool`]: keep-alive connections per origin
//! - [`connectjob`]: DNS → TCP → TLS connection flow
//! - [`timeout`]: per-read/per-write deadlines on established streams

pub mod client;
pub mod connectjob;
pub mod pool;
pub mod timeout;
