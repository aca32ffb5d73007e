//! Helpers for the plain HTML directory listings served by the open-data FTP mirror.

use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::debug;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Every anchor target on the page, in document order.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Ensures a directory URL ends with `/` so relative names can be appended.
pub fn directory_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Resolves a listing href against the listing URL with standard URL
/// reference rules (absolute, root-relative, `../` and plain names).
pub fn resolve_href(base: &str, href: &str) -> String {
    let base = directory_url(base);
    match Url::parse(&base).and_then(|url| url.join(href)) {
        Ok(url) => url.to_string(),
        Err(e) => {
            debug!("Could not resolve {} against {}: {}", href, base, e);
            format!("{}{}", base, href.trim_start_matches("./"))
        }
    }
}

/// Last path segment of an href, used as the local file name.
pub fn file_name_of(href: &str) -> &str {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <a href="?C=N;O=D">Name</a>
        <a href="../">Parent Directory</a>
        <a href="2023/">2023/</a>
        <a href="2024/">2024/</a>
        <a>no target</a>
        </body></html>"#;

    #[test]
    fn test_extract_hrefs_in_document_order() {
        assert_eq!(extract_hrefs(LISTING), vec!["?C=N;O=D", "../", "2023/", "2024/"]);
    }

    #[test]
    fn test_resolve_href() {
        let base = "https://example.org/FTP/PDA/registry/";
        assert_eq!(resolve_href(base, "file.csv"), "https://example.org/FTP/PDA/registry/file.csv");
        assert_eq!(resolve_href(base, "/other/file.csv"), "https://example.org/other/file.csv");
        assert_eq!(resolve_href(base, "http://mirror/file.csv"), "http://mirror/file.csv");
        assert_eq!(resolve_href(base, "../2024/1T2024.zip"), "https://example.org/FTP/PDA/2024/1T2024.zip");
        assert_eq!(resolve_href(base, "./file.csv"), "https://example.org/FTP/PDA/registry/file.csv");
        assert_eq!(
            resolve_href("https://example.org/dir", "x.zip"),
            "https://example.org/dir/x.zip"
        );
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("https://example.org/a/Relatorio_cadop.csv"), "Relatorio_cadop.csv");
        assert_eq!(file_name_of("3T2024.zip?download=1"), "3T2024.zip");
    }
}
