use crate::error::Result;
use std::path::Path;

/// Network access needed by the ingestion and enrichment stages. The reqwest
/// adapter lives in `infra::http_client`; tests substitute an in-memory fake.
pub trait HttpClientPort: Send + Sync {
    /// Fetches a page body as text. Any non-success status is an error.
    fn get_text(&self, url: &str) -> Result<String>;

    /// Streams the response body into `dest`, returning the byte count.
    /// Only a 200 response is accepted.
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}
