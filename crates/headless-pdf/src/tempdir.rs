//! Scoped temporary directory for the browser profile
//!
//! Acquired before the browser starts and released explicitly by its owner
//! with [`TemporaryDirectory::close`] once the process is gone.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::{PdfError, Result};

#[derive(Debug)]
pub struct TemporaryDirectory {
    dir: TempDir,
}

impl TemporaryDirectory {
    /// Create a fresh directory below `root`, or the system temp dir
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("headless-pdf-");

        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Resolve a relative path below the directory.
    ///
    /// `.` and `..` segments are normalized lexically; anything that would
    /// end up above the directory is rejected.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let mut steps: Vec<&str> = Vec::new();

        for step in path.split('/').filter(|s| !s.is_empty()) {
            match step {
                "." => {}
                ".." if steps.last().is_some_and(|last| *last != "..") => {
                    steps.pop();
                }
                _ => steps.push(step),
            }
        }

        if steps.first() == Some(&"..") {
            return Err(PdfError::PathEscapesBase(path.to_string()));
        }

        Ok(steps
            .iter()
            .fold(self.path().to_path_buf(), |acc, step| acc.join(step)))
    }

    /// Remove the directory and everything in it
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
