//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with manual redirects and streaming bodies
//! - Default cache roots via `dirs`
//!
//! SMB and the playback engine are host-specific and are not provided here.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_cache_roots, ReqwestHttpClient};
//!
//! let http = ReqwestHttpClient::new()?;
//! let roots = default_cache_roots("mpc");
//! ```

mod http;
mod paths;

pub use http::{
    ReqwestHttpClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use paths::{default_cache_roots, CacheRoots};
