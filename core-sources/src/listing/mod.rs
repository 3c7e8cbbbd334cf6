//! # Directory Listing
//!
//! HTTP index pages and SMB shares listed into one entry shape.

mod html;
mod http;
mod smb;

pub use http::HttpDirectoryLister;
pub use smb::SmbDirectoryLister;

use serde::Serialize;
use std::cmp::Ordering;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    /// Decoded display name without a trailing slash
    pub name: String,
    /// Credential-free identity to open or list next
    pub source_id: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

/// Incremental progress of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListingProgress {
    pub bytes_read: u64,
    pub entries_found: usize,
}

/// Callback receiving [`ListingProgress`] updates.
pub type ListingObserver<'a> = &'a (dyn Fn(ListingProgress) + Send + Sync);

/// Directories first, then case-insensitive name.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(compare_entries);
}

fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_directory: bool) -> DirectoryEntry {
        DirectoryEntry {
            name: name.to_string(),
            source_id: format!("http://h/{}", name),
            is_directory,
            size: None,
        }
    }

    #[test]
    fn test_directories_first_then_case_insensitive() {
        let mut entries = vec![
            entry("b.mp3", false),
            entry("Zed", true),
            entry("A.mp3", false),
            entry("alpha", true),
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zed", "A.mp3", "b.mp3"]);
    }
}
