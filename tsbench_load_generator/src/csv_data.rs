//! Pre-generated CSV files for bulk load paths
//!
//! A file named `<rows>.csv` holds `rows` records, one per line as
//! `timestamp,current,voltage,phase` without a header.

use std::path::{Path, PathBuf};

use observability_deps::tracing::info;
use rand::Rng;

use crate::{Error, Result, generator::Generator};

/// Path of the file holding `rows` records inside `dir`
pub fn csv_path(dir: &Path, rows: usize) -> PathBuf {
    dir.join(format!("{rows}.csv"))
}

/// Write `rows` generated records to `<dir>/<rows>.csv`, replacing any existing file
pub fn write_csv<R: Rng>(
    dir: &Path,
    rows: usize,
    generator: &mut Generator<R>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = csv_path(dir, rows);

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)?;
    for _ in 0..rows {
        writer.write_record(generator.next_record().csv_fields())?;
    }
    writer.flush().map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), rows, "wrote csv data file");
    Ok(path)
}
