//! In-memory zip assembly.

use std::io::{Cursor, Write};

use sha2::{Digest, Sha256};
use tracing::debug;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::contract::ArchiveEntry;
use crate::error::ArchiveError;

/// Build a zip holding `entries` in input order.
///
/// Names are not deduplicated. An empty input yields a valid empty archive.
pub fn build(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for entry in entries {
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.content)?;
            debug!(entry = %entry.name, size = entry.content.len(), "Added archive entry");
        }

        zip.finish()?;
    }
    Ok(buffer)
}

/// A finished archive together with the names it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    pub file_name: String,
    pub entries: Vec<String>,
    pub bytes: Vec<u8>,
}

impl BuiltArchive {
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}
