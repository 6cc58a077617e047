//! External deployment check client

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::errors::DeployError;

/// Response body the check endpoint must return, verbatim
pub const CHECK_ACK: &str = "OK";

/// HTTP client for the external deployment check endpoint
pub struct CheckClient {
    client: Client,
    base_url: String,
}

impl CheckClient {
    /// Create a client for the given endpoint base URL
    pub fn new(base_url: &str) -> Result<Self, DeployError> {
        let trimmed = base_url.trim_end_matches('/');
        Url::parse(trimmed)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: trimmed.to_string(),
        })
    }

    /// Fetch the check verdict for an application.
    ///
    /// Returns the raw response body; the caller compares it against
    /// [`CHECK_ACK`]. Transport failures surface as errors.
    pub async fn check(&self, application: &str) -> Result<String, DeployError> {
        let url = format!("{}/{}/check", self.base_url, application);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let body = response.text().await?;
        Ok(body)
    }

    /// The URL queried for a given application
    pub fn url_for(&self, application: &str) -> String {
        format!("{}/{}/check", self.base_url, application)
    }
}
