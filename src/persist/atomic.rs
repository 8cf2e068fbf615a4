// Write-to-temp-then-rename. The destination either keeps its old content or
// gets the complete new content.
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::SinkError;

pub fn write_atomic<F>(dest: &Path, fill: F) -> Result<(), SinkError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), SinkError>,
{
    // Temp file must share the destination's filesystem for the rename to be atomic
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".quotepipe-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| SinkError::write(dest, e))?;

    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        fill(&mut out)?;
        out.flush().map_err(|e| SinkError::write(dest, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| SinkError::write(dest, e))?;

    let tmp_path = tmp.path().to_path_buf();
    tmp.persist(dest).map_err(|e| SinkError::write(dest, e.error))?;
    debug!(from = %tmp_path.display(), to = %dest.display(), "Output moved into place");
    Ok(())
}
