use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Whether `path` names a packaged chart rather than a directory or manifest.
pub fn looks_like_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tar" | "gz" | "tgz")
    )
}

/// Unpack a chart archive (`.tgz`, or a plain tar) into `dest`.
///
/// Entries that would land outside `dest` are skipped.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    let is_gzip = data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b;
    let cursor = Cursor::new(data);

    if is_gzip {
        unpack_tar(flate2::read::GzDecoder::new(cursor), dest)
    } else {
        unpack_tar(cursor, dest)
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries().context("Failed to read chart archive")? {
        let mut entry = entry_result.context("Failed to read chart archive entry")?;
        let entry_path = entry.path()?.to_string_lossy().to_string();

        let unpacked = entry
            .unpack_in(dest)
            .with_context(|| format!("Failed to unpack {entry_path}"))?;
        if !unpacked {
            warn!(entry = %entry_path, "skipping archive entry outside the chart");
        }
    }

    Ok(())
}
