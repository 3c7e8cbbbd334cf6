//! Source specs and locator classification.

pub mod archive;
pub mod http;
pub mod locator;
pub mod smb;

pub use archive::ArchiveSourceRef;
pub use http::HttpSourceSpec;
pub use locator::{Locator, LocatorClassifier, RemoteSpec};
pub use smb::SmbSourceSpec;
