//! Quota authority client.
//!
//! The reconciler talks to the authority through the [`QuotaAuthority`]
//! trait; [`HttpQuotaAuthority`] is the production JSON-over-HTTP
//! implementation. The client carries no retry loop of its own: the
//! reconciler retries by simply running the next cycle.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;
use warden_core::{AuthorityError, ReconcileRequest, ReconcileResponse};

/// Default per-request timeout for the HTTP client.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote quota authority: aggregates usage across all client processes.
#[async_trait]
pub trait QuotaAuthority: Send + Sync {
    /// Ship locally buffered usage and receive the authoritative merged view
    /// for every config key this client reported on or previously knew about.
    async fn reconcile(&self, request: ReconcileRequest)
        -> Result<ReconcileResponse, AuthorityError>;
}

/// JSON-over-HTTP quota authority client.
///
/// The underlying HTTP client is built lazily exactly once, so the first
/// reconcile pays the connection setup and concurrent first use cannot open
/// duplicate pools.
#[derive(Debug)]
pub struct HttpQuotaAuthority {
    endpoint: String,
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl HttpQuotaAuthority {
    /// Create a client for an authority base URL, e.g.
    /// `http://quota-0.quota:8443`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: OnceCell::new(),
        }
    }

    /// Per-request timeout applied by the HTTP client itself.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn client(&self) -> Result<&reqwest::Client, AuthorityError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|error| AuthorityError::Transport(error.to_string()))
            })
            .await
    }
}

#[async_trait]
impl QuotaAuthority for HttpQuotaAuthority {
    async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<ReconcileResponse, AuthorityError> {
        let client = self.client().await?;
        let url = format!("{}/v1/reconcile", self.endpoint);

        debug!(entities = request.entities.len(), %url, "sending reconcile batch");

        let response = client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|error| AuthorityError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<ReconcileResponse>()
            .await
            .map_err(|error| AuthorityError::Decode(error.to_string()))
    }
}
