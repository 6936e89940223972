use std::{fs, path::Path};

use crate::error::HlsWriterError;

/// Create the HLS output directory if needed and verify it is writable by
/// creating and removing a probe file. Writers are only constructed after
/// this check succeeds.
pub fn ensure_hls_directory(path: &Path) -> Result<(), HlsWriterError> {
    fs::create_dir_all(path)
        .map_err(|err| HlsWriterError::CreateDirectory(path.to_path_buf(), err))?;

    let probe = path.join(".write_probe");
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|err| HlsWriterError::DirectoryNotWritable(path.to_path_buf(), err))?;
    Ok(())
}
