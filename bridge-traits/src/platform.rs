//! Shared dynamic I/O aliases used across bridge traits.
//!
//! Bridge implementations hand streaming bodies back to the core as boxed
//! readers so that the core never has to know which transport produced them.

/// Dynamic async reader type handed across the bridge boundary.
pub type DynAsyncRead = dyn tokio::io::AsyncRead + Send + Unpin;
