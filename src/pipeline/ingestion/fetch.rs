use crate::app::ports::HttpClientPort;
use crate::error::Result;
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::ingestion::listing::{directory_url, file_name_of};
use crate::types::Period;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use zip::ZipArchive;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub periods_requested: usize,
    pub periods_failed: usize,
    pub downloads: usize,
    pub cache_hits: usize,
    pub download_failures: usize,
    pub entries_extracted: usize,
    pub entries_rejected: usize,
}

impl FetchStats {
    fn absorb(&mut self, extraction: &ExtractionStats) {
        self.entries_extracted += extraction.extracted;
        self.entries_rejected += extraction.rejected;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub extracted: usize,
    pub rejected: usize,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub files: Vec<PathBuf>,
    pub stats: FetchStats,
}

/// Downloads quarterly archives (reusing any already on disk) and unpacks them
/// into one flat directory per period.
pub struct ArchiveFetcher<'a> {
    http: &'a dyn HttpClientPort,
    base_url: String,
    download_dir: PathBuf,
    extract_dir: PathBuf,
}

impl<'a> ArchiveFetcher<'a> {
    pub fn new(
        http: &'a dyn HttpClientPort,
        base_url: &str,
        download_dir: &Path,
        extract_dir: &Path,
    ) -> Self {
        Self {
            http,
            base_url: directory_url(base_url),
            download_dir: download_dir.to_path_buf(),
            extract_dir: extract_dir.to_path_buf(),
        }
    }

    /// Archive URLs published for a `"<year>/<q>T"` identifier.
    pub fn archive_urls(&self, identifier: &str) -> Result<Vec<String>> {
        let period = Period::parse_identifier(identifier)?;
        Ok(vec![format!(
            "{}{}/{}",
            self.base_url,
            period.year(),
            period.archive_name()
        )])
    }

    /// Fetches and extracts every identifier. Failures are confined to the URL
    /// or period they occur in.
    #[instrument(skip(self, identifiers), fields(periods = identifiers.len()))]
    pub fn fetch_and_extract(&self, identifiers: &[String]) -> Result<FetchOutcome> {
        fs::create_dir_all(&self.download_dir)?;
        fs::create_dir_all(&self.extract_dir)?;

        let mut outcome = FetchOutcome::default();
        outcome.stats.periods_requested = identifiers.len();

        for identifier in identifiers {
            info!("Processing period {}", identifier);
            if let Err(e) = self.fetch_period(identifier, &mut outcome) {
                error!("Failed to process period {}: {}", identifier, e);
                outcome.stats.periods_failed += 1;
            }
        }

        metrics::increment(MetricName::FetchDownloads, outcome.stats.downloads as u64);
        metrics::increment(MetricName::FetchCacheHits, outcome.stats.cache_hits as u64);
        metrics::increment(
            MetricName::FetchDownloadErrors,
            outcome.stats.download_failures as u64,
        );
        metrics::increment(
            MetricName::FetchEntriesExtracted,
            outcome.stats.entries_extracted as u64,
        );
        metrics::increment(
            MetricName::FetchEntriesRejected,
            outcome.stats.entries_rejected as u64,
        );
        info!(
            "Extracted {} files from {} periods ({} downloads, {} cache hits)",
            outcome.files.len(),
            identifiers.len(),
            outcome.stats.downloads,
            outcome.stats.cache_hits
        );
        Ok(outcome)
    }

    fn fetch_period(&self, identifier: &str, outcome: &mut FetchOutcome) -> Result<()> {
        let period = Period::parse_identifier(identifier)?;
        let urls = self.archive_urls(identifier)?;
        let download_dir = self.download_dir.join(period.dir_name());
        let extract_dir = self.extract_dir.join(period.dir_name());

        for url in urls {
            let archive = match self.download_cached(&url, &download_dir, &mut outcome.stats) {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to download {}: {}", url, e);
                    outcome.stats.download_failures += 1;
                    continue;
                }
            };
            match extract_archive(&archive, &extract_dir) {
                Ok((files, extraction)) => {
                    info!(
                        "Extracted {} files from {}",
                        files.len(),
                        archive.display()
                    );
                    outcome.stats.absorb(&extraction);
                    for file in files {
                        if !outcome.files.contains(&file) {
                            outcome.files.push(file);
                        }
                    }
                }
                Err(e) => error!("Failed to extract {}: {}", archive.display(), e),
            }
        }
        Ok(())
    }

    fn download_cached(&self, url: &str, dir: &Path, stats: &mut FetchStats) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let dest = dir.join(file_name_of(url));
        if dest.exists() {
            debug!("Using cached archive {}", dest.display());
            stats.cache_hits += 1;
            return Ok(dest);
        }
        let bytes = self.http.download(url, &dest)?;
        stats.downloads += 1;
        info!("Downloaded {} ({} bytes)", dest.display(), bytes);
        Ok(dest)
    }
}

/// Extracts `archive` flat into `dest`, one entry at a time. Entries that would
/// land outside `dest` are skipped with a warning.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(Vec<PathBuf>, ExtractionStats)> {
    fs::create_dir_all(dest)?;
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    let mut files = Vec::new();
    let mut stats = ExtractionStats::default();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let raw_name = entry.name().to_string();
        let Some(target) = safe_entry_path(dest, &raw_name) else {
            warn!("Rejected archive entry outside destination: {}", raw_name);
            stats.rejected += 1;
            continue;
        };

        let mut writer = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut writer)?;
        writer.flush()?;
        debug!("Extracted {} -> {}", raw_name, target.display());
        stats.extracted += 1;
        if files.contains(&target) {
            warn!("Archive entry {} overwrote {}", raw_name, target.display());
        } else {
            files.push(target);
        }
    }
    Ok((files, stats))
}

/// Destination path for an archive entry, or `None` when the entry must be
/// rejected. Names are flattened to their last `/` or `\` segment; a name
/// carrying a parent-directory component is rejected outright.
pub fn safe_entry_path(dest: &Path, raw_name: &str) -> Option<PathBuf> {
    if raw_name.split(['/', '\\']).any(|part| part == "..") {
        return None;
    }
    let flat = raw_name.rsplit(['/', '\\']).next().unwrap_or(raw_name).trim();
    if flat.is_empty() || flat == "." {
        return None;
    }

    let root = normalize_lexically(dest);
    let candidate = normalize_lexically(&dest.join(flat));
    if candidate.starts_with(&root) && candidate != root {
        Some(dest.join(flat))
    } else {
        None
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_safe_entry_path_rules() {
        let dest = Path::new("/tmp/extract/2024_1T");
        assert_eq!(
            safe_entry_path(dest, "dir/sub/1T2024.csv"),
            Some(dest.join("1T2024.csv"))
        );
        assert_eq!(
            safe_entry_path(dest, "dir\\1T2024.csv"),
            Some(dest.join("1T2024.csv"))
        );
        assert_eq!(safe_entry_path(dest, "../evil.txt"), None);
        assert_eq!(safe_entry_path(dest, "a/../../evil.txt"), None);
        assert_eq!(safe_entry_path(dest, "..\\evil.txt"), None);
        assert_eq!(safe_entry_path(dest, "dir/"), None);
        assert_eq!(safe_entry_path(dest, "/etc/passwd"), Some(dest.join("passwd")));
    }

    #[test]
    fn test_extract_archive_flattens_and_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("1T2024.zip");
        write_zip(
            &archive,
            &[
                ("nested/1T2024.csv", "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n"),
                ("../evil.txt", "owned"),
            ],
        );
        let dest = tmp.path().join("out").join("2024_1T");

        let (files, stats) = extract_archive(&archive, &dest).unwrap();

        assert_eq!(files, vec![dest.join("1T2024.csv")]);
        assert_eq!(stats, ExtractionStats { extracted: 1, rejected: 1 });
        assert!(!tmp.path().join("out").join("evil.txt").exists());
        assert!(!dest.join("evil.txt").exists());
        let mut content = String::new();
        File::open(&files[0]).unwrap().read_to_string(&mut content).unwrap();
        assert!(content.starts_with("REG_ANS"));
    }

    #[test]
    fn test_same_base_name_is_listed_once() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("1T2024.zip");
        write_zip(&archive, &[("a/1T2024.csv", "first"), ("b/1T2024.csv", "second")]);
        let dest = tmp.path().join("2024_1T");

        let (files, stats) = extract_archive(&archive, &dest).unwrap();

        assert_eq!(files, vec![dest.join("1T2024.csv")]);
        assert_eq!(stats.extracted, 2);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "second");
    }

    #[test]
    fn test_reextraction_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("a.zip");
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("data.csv"), "stale").unwrap();
        write_zip(&archive, &[("data.csv", "fresh")]);

        extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("data.csv")).unwrap(), "fresh");
    }
}
