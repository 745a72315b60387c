//! Mock Polygon server setup for integration tests

use mockito::{Matcher, Server, ServerGuard};
use polygon_api::{PolygonSession, WebDownloader};
use std::time::Duration;

pub const API_KEY: &str = "test-api-key";
pub const API_SECRET: &str = "test-api-secret";

/// Test fixture that owns a mock server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Session pointed at the mock server, with millisecond backoff waits.
    pub fn session(&self) -> PolygonSession {
        PolygonSession::builder()
            .base_url(&self.base_url)
            .api_key(API_KEY)
            .api_secret(API_SECRET)
            .start_wait(Duration::from_millis(1))
            .use_keyring(false)
            .use_environment(false)
            .build()
            .expect("session builds")
    }

    pub fn web(&self) -> WebDownloader {
        WebDownloader::new("jury", "s3cret")
            .and_then(|w| w.with_base_url(&self.base_url))
            .expect("web downloader builds")
    }

    /// Mock a method answering with a JSON body.
    pub async fn mock_json(&mut self, method: &str, body: &str, hits: usize) -> mockito::Mock {
        self.server
            .mock("POST", format!("/{}", method).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    /// Mock a method answering with something that is not an envelope.
    pub async fn mock_html(&mut self, method: &str, hits: usize) -> mockito::Mock {
        self.server
            .mock("POST", format!("/{}", method).as_str())
            .with_status(502)
            .with_header("content-type", "text/html")
            .with_body("<html><body><h1>502 Bad Gateway</h1></body></html>")
            .expect(hits)
            .create_async()
            .await
    }
}

/// Matches a multipart body carrying `name` with exactly `value`.
pub fn multipart_field(name: &str, value: &str) -> Matcher {
    Matcher::Regex(format!(
        r#"(?s)name="{}".*?\r\n\r\n{}\r\n"#,
        regex::escape(name),
        regex::escape(value)
    ))
}

/// Matches a multipart body that has a part called `name`.
pub fn multipart_has(name: &str) -> Matcher {
    Matcher::Regex(format!(r#"name="{}""#, regex::escape(name)))
}
