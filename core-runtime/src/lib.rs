//! # Core Runtime Module
//!
//! Runtime plumbing shared by the source-acquisition crates:
//! - Logging and tracing setup with credential redaction
//! - Cache and network configuration
//! - Event bus for load progress and cache maintenance
//!
//! ## Overview
//!
//! Nothing here knows about HTTP, SMB or archives. Domain crates build on
//! these pieces and hosts initialise them once at startup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SourceCacheConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
