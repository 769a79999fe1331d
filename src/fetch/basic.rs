use super::client::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }

    /// Client with a connect timeout; per-request timeouts are set by the fetcher.
    pub fn with_connect_timeout(connect_timeout: Duration) -> reqwest::Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .build()?;
        Ok(Self(inner))
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
