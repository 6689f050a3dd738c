//! Test utilities and helper functions for the archiver test suite

use kodegen_tools_webarchive::config::ArchiveConfig;
use mockito::{Mock, Server};
use std::path::Path;

/// Route `log` output through the test harness
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a test HTML document with specified head and body content
#[allow(dead_code)]
pub fn create_test_html(title: &str, head: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{}</title>
    {}
</head>
<body>
    {}
</body>
</html>"#,
        html_escape::encode_text(title),
        head,
        body
    )
}

/// Creates a mock endpoint serving `body` with `content_type`
#[allow(dead_code)]
pub async fn create_mock(server: &mut Server, path: &str, content_type: &str, body: &str) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .create_async()
        .await
}

/// Like `create_mock`, asserting the endpoint is hit exactly `hits` times
#[allow(dead_code)]
pub async fn create_expected_mock(
    server: &mut Server,
    path: &str,
    content_type: &str,
    body: &str,
    hits: usize,
) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

/// Creates a mock endpoint that returns HTML content
#[allow(dead_code)]
pub async fn create_html_mock(server: &mut Server, path: &str, html: &str) -> Mock {
    create_mock(server, path, "text/html; charset=utf-8", html).await
}

/// Creates a mock endpoint that returns an error
#[allow(dead_code)]
pub async fn create_error_mock(server: &mut Server, path: &str, status: usize) -> Mock {
    server
        .mock("GET", path)
        .with_status(status)
        .with_body("Error")
        .create_async()
        .await
}

/// Config writing into `download_root` without rate limiting
#[allow(dead_code)]
pub fn test_config(download_root: &Path) -> ArchiveConfig {
    ArchiveConfig::builder()
        .download_root(download_root)
        .crawl_rate_rps(None)
        .request_timeout_secs(10)
        .build()
        .expect("Failed to create test config")
}

/// First archive path segment for resources served by `server`
#[allow(dead_code)]
pub fn host_dir(server: &Server) -> String {
    server.host_with_port()
}

/// Helper to create test URLs
#[allow(dead_code)]
pub fn test_url(server: &Server, path: &str) -> String {
    format!("{}{}", server.url(), path)
}

/// Reads an archived file, panicking with its path when missing
#[allow(dead_code)]
pub fn read_archived(download_root: &Path, archive_path: &str) -> String {
    let path = download_root.join(archive_path);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}
