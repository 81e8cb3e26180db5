//! Decoding of the workflow metadata artifact.
//!
//! Artifacts are downloaded as zip archives. The build-and-push workflow
//! uploads a single JSON document carrying at least the image `digest`.

use std::io::{Cursor, Read};

use tracing::debug;

use crate::error::ForgeError;
use crate::types::RunMetadata;
use crate::Result;

/// Read `entry_name` from a zip archive and parse it as [`RunMetadata`].
///
/// If the archive has no entry by that name but contains exactly one file,
/// that file is used instead.
pub fn read_metadata_archive(archive: &[u8], entry_name: &str) -> Result<RunMetadata> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;

    let index = match zip.index_for_name(entry_name) {
        Some(index) => index,
        None => {
            let files: Vec<usize> = (0..zip.len())
                .filter(|i| zip.by_index(*i).map(|f| !f.is_dir()).unwrap_or(false))
                .collect();
            match files.as_slice() {
                [only] => {
                    debug!(entry = entry_name, "Named entry absent, using the only file");
                    *only
                }
                _ => {
                    let names: Vec<&str> = zip.file_names().collect();
                    return Err(ForgeError::Archive(format!(
                        "entry '{}' not found (archive contains: {})",
                        entry_name,
                        names.join(", ")
                    )));
                }
            }
        }
    };

    let mut text = String::new();
    zip.by_index(index)?
        .read_to_string(&mut text)
        .map_err(|e| ForgeError::Archive(e.to_string()))?;

    Ok(serde_json::from_str(&text)?)
}
