//! Protocol plumbing shared by downloads and listings.

pub mod http;
pub mod smb;

pub use http::{Fetched, HttpFetcher};
pub use smb::SmbConnector;
