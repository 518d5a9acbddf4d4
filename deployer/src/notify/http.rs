//! HTTP status notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployerError;
use crate::notify::{StatusEvent, StatusNotifier};

/// Posts status events as JSON to a configured endpoint
pub struct HttpNotifier {
    client: Client,
    url: Url,
    token: Option<SecretString>,
}

impl HttpNotifier {
    pub fn new(url: Url, token: Option<SecretString>) -> Result<Self, DeployerError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url, token })
    }

    async fn post(&self, event: &StatusEvent) -> Result<(), DeployerError> {
        debug!("POST {}", self.url);
        let mut request = self.client.post(self.url.clone()).json(event);
        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DeployerError::ServerError(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusNotifier for HttpNotifier {
    async fn notify(&self, event: &StatusEvent) {
        if let Err(e) = self.post(event).await {
            error!("Failed to deliver status for job {}: {}", event.job_id, e);
        }
    }
}
