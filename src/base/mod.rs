//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): error codes, with a coarse
//!   [`ErrorKind`](neterror::ErrorKind)
//! - [`LoadState`](loadstate::LoadState): progress of an exchange

pub mod context;
pub mod loadstate;
pub mod neterror;
