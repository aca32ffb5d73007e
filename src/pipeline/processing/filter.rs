//! Picks the extracted files that carry expense data and sniffs their delimiter.

use crate::constants::{EXPENSE_KEYWORDS, HEADER_KEYWORDS, SUPPORTED_EXTENSIONS};
use crate::error::Result;
use crate::pipeline::utils::read_first_line;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileFormat {
    Csv,
    Txt,
    Xlsx,
    Xls,
    Unknown,
}

impl FileFormat {
    /// Whether the consolidator can stream this format as delimited text.
    pub fn is_delimited(&self) -> bool {
        matches!(self, FileFormat::Csv | FileFormat::Txt)
    }
}

pub fn file_format(path: &Path) -> FileFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => FileFormat::Csv,
        "txt" => FileFormat::Txt,
        "xlsx" => FileFormat::Xlsx,
        "xls" => FileFormat::Xls,
        _ => FileFormat::Unknown,
    }
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A supported file is relevant when its name, or failing that its first
/// line, mentions one of the expense keywords.
pub fn is_relevant(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if let Some(keyword) = EXPENSE_KEYWORDS.iter().find(|k| name.contains(*k)) {
        debug!("{} matched by name keyword '{}'", name, keyword);
        return true;
    }
    match read_first_line(path) {
        Ok(line) => {
            let line = line.to_lowercase();
            HEADER_KEYWORDS.iter().any(|k| line.contains(k))
        }
        Err(e) => {
            debug!("Could not read header of {}: {}", path.display(), e);
            false
        }
    }
}

pub fn filter_relevant(files: &[PathBuf]) -> Vec<PathBuf> {
    info!("Filtering {} extracted files", files.len());
    let relevant: Vec<PathBuf> = files
        .iter()
        .filter(|f| is_supported(f))
        .filter(|f| is_relevant(f))
        .cloned()
        .collect();
    info!("{} files carry expense data", relevant.len());
    relevant
}

/// Most frequent of `;` `,` `\t` `|` in the first line of the file.
pub fn detect_delimiter(path: &Path) -> Result<u8> {
    Ok(detect_delimiter_in(&read_first_line(path)?))
}

/// Ties resolve in the order `;`, `,`, `\t`, `|`.
pub fn detect_delimiter_in(line: &str) -> u8 {
    const CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];
    let mut best = CANDIDATES[0];
    let mut best_count = 0;
    for candidate in CANDIDATES {
        let count = line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_format() {
        assert_eq!(file_format(Path::new("a/1T2024.CSV")), FileFormat::Csv);
        assert_eq!(file_format(Path::new("dados.txt")), FileFormat::Txt);
        assert_eq!(file_format(Path::new("x.xlsx")), FileFormat::Xlsx);
        assert_eq!(file_format(Path::new("x.xls")), FileFormat::Xls);
        assert_eq!(file_format(Path::new("x.pdf")), FileFormat::Unknown);
        assert!(!is_supported(Path::new("readme")));
    }

    #[test]
    fn test_detect_delimiter_counts_and_tie_breaks() {
        assert_eq!(detect_delimiter_in("a;b;c"), b';');
        assert_eq!(detect_delimiter_in("a,b,c;d"), b',');
        assert_eq!(detect_delimiter_in("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter_in("a|b|c"), b'|');
        assert_eq!(detect_delimiter_in("a,b;c"), b';');
        assert_eq!(detect_delimiter_in("a\tb|c"), b'\t');
        assert_eq!(detect_delimiter_in("abc"), b';');
    }

    #[test]
    fn test_relevance_by_name_or_header() {
        let tmp = tempfile::tempdir().unwrap();
        let by_name = tmp.path().join("Despesas_2024.csv");
        fs::write(&by_name, "x;y\n").unwrap();
        let by_header = tmp.path().join("1T2024.csv");
        fs::write(&by_header, "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n").unwrap();
        let unrelated = tmp.path().join("cadastro.csv");
        fs::write(&unrelated, "nome;cidade\n").unwrap();
        let wrong_ext = tmp.path().join("despesas.pdf");
        fs::write(&wrong_ext, "").unwrap();

        let files = vec![by_name.clone(), by_header.clone(), unrelated, wrong_ext];
        assert_eq!(filter_relevant(&files), vec![by_name, by_header]);
    }
}
