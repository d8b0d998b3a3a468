//! Raw frame output.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Write `data` to `path` verbatim, replacing any previous content.
///
/// No header is written; consumers know the geometry out of band.
pub fn write_raw_frame(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.flush()
}
