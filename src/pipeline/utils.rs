use crate::constants::OUTPUT_DELIMITER;
use crate::error::{PipelineError, Result};
use csv::{ByteRecord, Reader, ReaderBuilder, Trim, Writer, WriterBuilder};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Header-aware reader: trimmed fields, ragged rows allowed (a short row
/// surfaces as a missing field, not as a reader error).
pub fn delimited_reader<R: Read>(reader: R, delimiter: u8) -> Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Creates `path` (and its parent directory) as a `;`-delimited output file.
pub fn create_output(path: &Path) -> Result<Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    Ok(WriterBuilder::new().delimiter(OUTPUT_DELIMITER).from_writer(file))
}

/// Reads only the first line of a file, tolerating invalid UTF-8.
pub fn read_first_line(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf)?;
    let line = String::from_utf8_lossy(&buf);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Column positions resolved from a header row. Lookups ignore case and a
/// leading byte-order mark.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn new(headers: &ByteRecord) -> Self {
        let mut positions = HashMap::new();
        for (i, raw) in headers.iter().enumerate() {
            positions.entry(header_key(&decode_field(raw))).or_insert(i);
        }
        Self { positions }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(&header_key(column)).copied()
    }

    pub fn require(&self, column: &str) -> Result<usize> {
        self.position(column)
            .ok_or_else(|| PipelineError::MissingField(format!("column {} not in header", column)))
    }

    /// Field value for `column`, or `""` when the column or the field is absent.
    pub fn get_or_empty(&self, record: &ByteRecord, column: &str) -> String {
        self.position(column)
            .and_then(|i| record.get(i))
            .map(decode_field)
            .unwrap_or_default()
    }
}

/// Field at `index`; a row shorter than the header is a missing field.
pub fn field(record: &ByteRecord, index: usize, column: &str) -> Result<String> {
    record
        .get(index)
        .map(decode_field)
        .ok_or_else(|| PipelineError::MissingField(column.to_string()))
}

pub fn decode_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

fn header_key(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_index_is_case_and_bom_insensitive() {
        let headers = ByteRecord::from(vec!["\u{feff}REG_ANS", "Cd_Conta_Contabil", "VL_SALDO_FINAL"]);
        let index = HeaderIndex::new(&headers);
        assert_eq!(index.position("reg_ans"), Some(0));
        assert_eq!(index.position("CD_CONTA_CONTABIL"), Some(1));
        assert!(index.require("DESCRICAO").is_err());
    }

    #[test]
    fn test_short_row_is_missing_field() {
        let mut rdr = delimited_reader("a;b;c\n1;2\n".as_bytes(), b';');
        let headers = rdr.byte_headers().unwrap().clone();
        let index = HeaderIndex::new(&headers);
        let row = rdr.byte_records().next().unwrap().unwrap();
        assert_eq!(field(&row, index.require("b").unwrap(), "b").unwrap(), "2");
        assert!(field(&row, index.require("c").unwrap(), "c").is_err());
        assert_eq!(index.get_or_empty(&row, "c"), "");
    }

    #[test]
    fn test_read_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "REG_ANS;VALOR\r\n1;2\n").unwrap();
        assert_eq!(read_first_line(file.path()).unwrap(), "REG_ANS;VALOR");
    }
}
