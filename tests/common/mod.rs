use ans_pipeline::app::ports::HttpClientPort;
use ans_pipeline::error::{PipelineError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use zip::write::FileOptions;
use zip::ZipWriter;

/// In-memory stand-in for the remote open-data mirror.
#[derive(Default)]
pub struct FakeHttp {
    pages: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

fn not_found(url: &str) -> PipelineError {
    PipelineError::HttpStatus {
        url: url.to_string(),
        status: 404,
    }
}

impl HttpClientPort for FakeHttp {
    fn get_text(&self, url: &str) -> Result<String> {
        self.pages.get(url).cloned().ok_or_else(|| not_found(url))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let bytes = self.files.get(url).ok_or_else(|| not_found(url))?;
        fs::write(dest, bytes)?;
        self.downloads.lock().unwrap().push(url.to_string());
        Ok(bytes.len() as u64)
    }
}

/// Directory listing linking every name in `hrefs`.
pub fn listing(hrefs: &[&str]) -> String {
    let links: String = hrefs
        .iter()
        .map(|h| format!("<a href=\"{}\">{}</a>\n", h, h))
        .collect();
    format!("<html><body><pre>\n<a href=\"../\">Parent Directory</a>\n{}</pre></body></html>", links)
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
