use crate::constants::{AGGREGATED_FILE, ENRICHED_FILE, VALIDATED_FILE};
use crate::error::{PipelineError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn add_file<W: Write + io::Seek>(zip: &mut ZipWriter<W>, path: &Path, name: &str) -> Result<()> {
    zip.start_file(name, options())?;
    let mut reader = BufReader::new(File::open(path)?);
    io::copy(&mut reader, zip)?;
    Ok(())
}

/// Compresses `csv` into a sibling `.zip` holding that single file.
pub fn compress_single(csv: &Path) -> Result<PathBuf> {
    let name = csv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::MissingInput(csv.display().to_string()))?;
    let zip_path = csv.with_extension("zip");
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&zip_path)?));
    add_file(&mut zip, csv, &name)?;
    zip.finish()?.flush()?;
    info!("Wrote {}", zip_path.display());
    Ok(zip_path)
}

/// Bundles the aggregated result with whichever intermediate files exist.
/// Returns the archive path and the entry names it contains.
pub fn write_bundle(output_dir: &Path, bundle_name: &str) -> Result<(PathBuf, Vec<String>)> {
    let aggregated = output_dir.join(AGGREGATED_FILE);
    if !aggregated.exists() {
        return Err(PipelineError::MissingInput(aggregated.display().to_string()));
    }
    let bundle_path = output_dir.join(bundle_name);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&bundle_path)?));
    let mut entries = Vec::new();

    for name in [AGGREGATED_FILE, ENRICHED_FILE, VALIDATED_FILE] {
        let path = output_dir.join(name);
        if path.exists() {
            add_file(&mut zip, &path, name)?;
            entries.push(name.to_string());
        }
    }
    zip.finish()?.flush()?;
    info!("Wrote {} with {:?}", bundle_path.display(), entries);
    Ok((bundle_path, entries))
}
