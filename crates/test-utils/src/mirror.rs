//! A file-backed stand-in for the remote product server.
//!
//! Tests lay out zip payloads under a temporary root using the same relative
//! paths the planner produces, then point the extractor at `file://<root>/`.

use std::path::{Path, PathBuf};

use sat_common::RawRecord;
use tempfile::TempDir;

use crate::generators::{write_gsmap_zip, write_zip};

/// Temporary directory tree mimicking the remote layout.
pub struct Mirror {
    root: TempDir,
}

impl Mirror {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("Failed to create temporary mirror directory"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Base URL to configure the fetcher with (always ends in `/`).
    pub fn base_url(&self) -> String {
        format!("file://{}/", self.root.path().display())
    }

    /// Absolute path of a relative object path.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Publish a well-formed GSMaP payload at `relative`.
    pub fn put(&self, relative: &str, records: &[RawRecord]) -> PathBuf {
        let path = self.path_of(relative);
        write_gsmap_zip(&path, records);
        path
    }

    /// Publish a zip whose single entry has an unexpected name.
    pub fn put_misnamed(&self, relative: &str, records: &[RawRecord]) -> PathBuf {
        let path = self.path_of(relative);
        write_zip(&path, "unexpected.csv", crate::generators::gsmap_csv(records).as_bytes());
        path
    }

    /// Publish raw bytes that are not a zip archive.
    pub fn put_garbage(&self, relative: &str) -> PathBuf {
        let path = self.path_of(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create mirror directory");
        }
        std::fs::write(&path, b"this is not a zip archive").expect("Failed to write mirror file");
        path
    }

    /// Remove a published object, simulating a hole on the server.
    pub fn remove(&self, relative: &str) {
        let _ = std::fs::remove_file(self.path_of(relative));
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}
