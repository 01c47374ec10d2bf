use std::future::Future;
use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::endpoints::ApiRequest;
use crate::api::rate_limiter::{RateLimiterRegistry, WindowLimit};
use crate::api::retry::{RetryPolicy, RetryState};
use crate::api::transport::{ReqwestTransport, Transport};
use crate::config::Config;
use crate::error::{ApiError, ApiErrorKind, Error};
use crate::models::RawPayload;

/// Base URL with `{host}` substituted by the routing value
pub const RIOT_BASE_URL: &str = "https://{host}.api.riotgames.com";

/// Rate-limited, retrying client for the Riot API
pub struct RiotClient {
    transport: Arc<dyn Transport>,
    limiters: RateLimiterRegistry,
    retry: RetryPolicy,
    base_url: String,
}

impl RiotClient {
    /// Create a client that talks to the real API
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(&config.riot_api_key, config.request_timeout)?;
        Ok(Self::new(
            Arc::new(transport),
            config.rate_limits.clone(),
            config.retry_policy(),
        ))
    }

    pub fn new(transport: Arc<dyn Transport>, limits: Vec<WindowLimit>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            limiters: RateLimiterRegistry::new(limits),
            retry,
            base_url: RIOT_BASE_URL.to_string(),
        }
    }

    /// Point the client at another host template (must contain `{host}`)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Issue a request, waiting on the rate limiter and retrying transient failures.
    ///
    /// NotFound, Unauthorized and Malformed are returned after the first attempt.
    /// Other failures are retried until the policy gives up, then the last
    /// error is returned.
    pub async fn request(&self, request: &ApiRequest) -> Result<RawPayload, ApiError> {
        match self.drive(request, None).await {
            Ok(payload) => Ok(payload),
            Err(Halt::Failed(e)) => Err(e),
            Err(Halt::Cancelled) => Err(ApiError::network("request cancelled")),
        }
    }

    /// Like [`request`](Self::request), but stops waiting once `cancel` fires.
    ///
    /// An HTTP call already on the wire is allowed to finish; cancellation is
    /// observed before each attempt and during rate-limit and backoff waits.
    pub async fn request_cancellable(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, Error> {
        match self.drive(request, Some(cancel)).await {
            Ok(payload) => Ok(payload),
            Err(Halt::Failed(e)) => Err(Error::Api(e)),
            Err(Halt::Cancelled) => Err(Error::Cancelled),
        }
    }

    async fn drive(
        &self,
        request: &ApiRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawPayload, Halt> {
        let limiter = self.limiters.limiter(request.routing.host());
        let url = request.url(&self.base_url);
        let query = request.query();

        let mut state = self.retry.start();
        let mut last_error: Option<ApiError> = None;

        loop {
            match state {
                RetryState::Attempting { attempt } => {
                    interruptible(limiter.until_ready(1), cancel).await?;
                    debug!("Attempt {} for {}", attempt, request.key());

                    match self.attempt(&url, &query).await {
                        Ok(payload) => return Ok(payload),
                        Err(e) => {
                            if e.kind == ApiErrorKind::RateLimited {
                                if let Some(wait) = e.retry_after {
                                    limiter.pause_for(wait);
                                }
                            }
                            state = self.retry.next(attempt, Err(&e));
                            last_error = Some(e);
                        }
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    warn!(
                        "Request {} failed on attempt {} ({}), retrying in {:?}",
                        request.key(),
                        attempt,
                        last_error.as_ref().map(|e| e.kind.as_str()).unwrap_or("unknown"),
                        delay
                    );
                    interruptible(sleep(delay), cancel).await?;
                    state = RetryState::Attempting {
                        attempt: attempt + 1,
                    };
                }
                RetryState::Failed(kind) => {
                    debug!("Giving up on {} ({})", request.key(), kind);
                    let err = last_error.unwrap_or_else(|| ApiError::new(kind, "request failed"));
                    return Err(Halt::Failed(err));
                }
                RetryState::Succeeded => {
                    let err = last_error
                        .unwrap_or_else(|| ApiError::malformed("retry loop finished without payload"));
                    return Err(Halt::Failed(err));
                }
            }
        }
    }

    /// One HTTP round trip, mapped to a payload or a classified error
    async fn attempt(&self, url: &str, query: &[(String, String)]) -> Result<RawPayload, ApiError> {
        let response = self.transport.get(url, query).await?;

        if !response.is_success() {
            return Err(ApiError::from_status(
                response.status,
                response.retry_after,
                &response.body,
            ));
        }

        RawPayload::from_json(&response.body)
            .map_err(|e| ApiError::malformed(format!("Failed to decode {}: {}", url, e)))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Why the retry loop stopped without a payload
enum Halt {
    Failed(ApiError),
    Cancelled,
}

/// Await `wait` unless `cancel` fires first
async fn interruptible<F: Future<Output = ()>>(
    wait: F,
    cancel: Option<&CancellationToken>,
) -> Result<(), Halt> {
    let Some(cancel) = cancel else {
        wait.await;
        return Ok(());
    };

    if cancel.is_cancelled() {
        return Err(Halt::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Halt::Cancelled),
        _ = wait => Ok(()),
    }
}
