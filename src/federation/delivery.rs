//! Activity delivery
//!
//! Signs and POSTs activities to remote inboxes, retrying transient
//! failures with exponential backoff.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::guard;
use super::signature::sign_request;
use crate::config::DeliveryConfig;
use crate::data::KeyPair;
use crate::error::AppError;
use crate::metrics::DELIVERY_ATTEMPTS;

/// Key material used to sign a delivery
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    /// Full key URI (actor#main-key)
    pub key_id: String,
    pub key_pair: Arc<KeyPair>,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Result of a successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub inbox_uri: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub status_code: u16,
}

enum AttemptError {
    /// Worth another try
    Transient(String),
    /// Retrying cannot help
    Permanent(String),
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Activity delivery service
///
/// Sends activities to remote inbox endpoints.
pub struct ActivityDelivery {
    http_client: Arc<reqwest::Client>,
    policy: RetryPolicy,
    allow_private_hosts: bool,
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(http_client: Arc<reqwest::Client>, policy: RetryPolicy, allow_private_hosts: bool) -> Self {
        Self {
            http_client,
            policy,
            allow_private_hosts,
        }
    }

    /// Deliver activity to a single inbox
    ///
    /// Every attempt is signed afresh so the Date header stays current
    /// across backoff waits.
    ///
    /// # Errors
    /// - `DeliveryRejected` for an unusable inbox URI, a host resolving to an
    ///   internal address, or a non-retryable 4xx
    /// - `DeliveryFailed` when transient failures outlast `max_attempts`
    pub async fn deliver(
        &self,
        activity: &Value,
        inbox_uri: &str,
        signer: &SigningIdentity,
    ) -> Result<DeliveryResult, AppError> {
        let rejected = |reason: String| AppError::DeliveryRejected {
            inbox: inbox_uri.to_string(),
            reason,
        };

        let url = guard::check_url_shape(inbox_uri, self.allow_private_hosts).map_err(rejected)?;

        let body = serde_json::to_vec(activity).map_err(|e| AppError::Internal(e.into()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.attempt(&url, &body, signer).await {
                Ok(status_code) => {
                    DELIVERY_ATTEMPTS.with_label_values(&["success"]).inc();
                    tracing::info!(inbox = %inbox_uri, attempt, status = status_code, "Delivered activity");
                    return Ok(DeliveryResult {
                        inbox_uri: inbox_uri.to_string(),
                        attempts: attempt,
                        status_code,
                    });
                }
                Err(AttemptError::Permanent(reason)) => {
                    DELIVERY_ATTEMPTS.with_label_values(&["permanent"]).inc();
                    return Err(rejected(reason));
                }
                Err(AttemptError::Transient(reason)) => {
                    DELIVERY_ATTEMPTS.with_label_values(&["transient"]).inc();
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(inbox = %inbox_uri, attempts = attempt, %reason, "Giving up on delivery");
                        return Err(AppError::DeliveryFailed {
                            inbox: inbox_uri.to_string(),
                            attempts: attempt,
                        });
                    }

                    let backoff = self.policy.backoff_for(attempt);
                    tracing::debug!(
                        inbox = %inbox_uri,
                        attempt,
                        %reason,
                        backoff_ms = backoff.as_millis() as u64,
                        "Delivery attempt failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        inbox: &url::Url,
        body: &[u8],
        signer: &SigningIdentity,
    ) -> Result<u16, AttemptError> {
        if !self.allow_private_hosts {
            guard::check_resolved_host(inbox).await.map_err(|error| match error {
                guard::ResolveError::Lookup(reason) => AttemptError::Transient(reason),
                guard::ResolveError::NonPublic(reason) => AttemptError::Permanent(reason),
            })?;
        }

        let sig_headers = sign_request(
            "POST",
            inbox.as_str(),
            Some(body),
            signer.key_pair.private_key(),
            &signer.key_id,
        )
        .map_err(|e| AttemptError::Permanent(e.to_string()))?;

        let mut request = self
            .http_client
            .post(inbox.clone())
            .header("Content-Type", super::ACTIVITY_JSON)
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else if is_retryable_status(status) {
            Err(AttemptError::Transient(format!("HTTP {}", status)))
        } else {
            Err(AttemptError::Permanent(format!("HTTP {}", status)))
        }
    }

    /// Deliver in a detached task; the outcome is only logged.
    pub fn dispatch(
        self: &Arc<Self>,
        activity: Value,
        inbox_uri: String,
        signer: SigningIdentity,
    ) -> tokio::task::JoinHandle<()> {
        let delivery = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = delivery.deliver(&activity, &inbox_uri, &signer).await {
                tracing::warn!(inbox = %inbox_uri, kind = error.kind(), %error, "Delivery failed");
            }
        })
    }
}

/// Activity builders for outbound responses
pub mod builder {
    use serde_json::{Value, json};

    /// Mint an activity id under the local actor: `{actor}/{collection}/{ulid}`.
    pub fn activity_id(actor: &str, collection: &str) -> String {
        format!("{}/{}/{}", actor, collection, ulid::Ulid::new())
    }

    /// The Follow being answered, embedded as the object of Accept/Reject
    pub fn follow_object(follow_id: &str, follower: &str, followee: &str) -> Value {
        json!({
            "id": follow_id,
            "type": "Follow",
            "actor": follower,
            "object": followee
        })
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted (usually a Follow)
    pub fn accept(actor: &str, object: Value) -> Value {
        json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "id": activity_id(actor, "accepts"),
            "actor": actor,
            "object": object
        })
    }

    /// Build a Reject activity.
    pub fn reject(actor: &str, object: Value) -> Value {
        json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Reject",
            "id": activity_id(actor, "rejects"),
            "actor": actor,
            "object": object
        })
    }
}
