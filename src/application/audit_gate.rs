use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuditGateError {
    #[error("audit gate did not answer within {0:?}")]
    Timeout(Duration),

    #[error("audit gate answered with status {0}")]
    Rejected(u16),

    #[error("audit gate unreachable: {0}")]
    Unreachable(String),

    #[error("audit gate misconfigured: {0}")]
    Config(String),
}

/// External pre-condition that must succeed before money leaves an account.
#[async_trait]
pub trait AuditGate: Send + Sync {
    async fn check(&self) -> Result<(), AuditGateError>;
}

/// Audit gate reached with a bodiless `GET`; any 2xx answer is success.
#[derive(Debug, Clone)]
pub struct HttpAuditGate {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAuditGate {
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuditGateError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("fxledger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditGateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuditGate for HttpAuditGate {
    async fn check(&self) -> Result<(), AuditGateError> {
        info!(url = %self.url, "Sending request to audit gate");

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            let err = if e.is_timeout() {
                AuditGateError::Timeout(self.timeout)
            } else {
                AuditGateError::Unreachable(e.to_string())
            };
            warn!(url = %self.url, error = %err, "Audit gate request failed");
            err
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "Audit gate rejected request");
            return Err(AuditGateError::Rejected(status.as_u16()));
        }

        info!(url = %self.url, "Audit gate accepted request");
        Ok(())
    }
}
