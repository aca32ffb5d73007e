use crate::app::ports::HttpClientPort;
use crate::config::SourcesConfig;
use crate::error::{PipelineError, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("ans_pipeline/", env!("CARGO_PKG_VERSION"));

pub struct ReqwestHttp {
    client: Client,
}

impl ReqwestHttp {
    pub fn new(sources: &SourcesConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(sources.connect_timeout())
            .timeout(sources.read_timeout())
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClientPort for ReqwestHttp {
    fn get_text(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text()?)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Downloading {} -> {}", url, dest.display());
        let mut resp = self.client.get(url).send()?;
        if resp.status() != StatusCode::OK {
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        // Only a completed transfer is renamed into place and becomes a cache hit.
        let partial = partial_path(dest);
        let written = {
            let mut writer = BufWriter::new(File::create(&partial)?);
            match resp.copy_to(&mut writer) {
                Ok(n) => {
                    writer.flush()?;
                    n
                }
                Err(e) => {
                    drop(writer);
                    if let Err(rm) = fs::remove_file(&partial) {
                        warn!("Could not remove partial file {}: {}", partial.display(), rm);
                    }
                    return Err(e.into());
                }
            }
        };
        fs::rename(&partial, dest)?;
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
