//! solofed - a single-account ActivityPub server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - ActivityPub actor, inbox and followers endpoints         │
//! │  - WebFinger / NodeInfo discovery                           │
//! │  - Home page and metrics                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Actor resolution (cached remote fetches)                 │
//! │  - HTTP Signature verification                              │
//! │  - Inbox processing and outbound delivery                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Key-value store (SQLite or memory)                       │
//! │  - Key pairs and follower records                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: ActivityPub federation handling
//! - `data`: Persistence
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

/// Largest inbox body accepted
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// Cloned for each request; every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Local actor key pairs
    pub keys: Arc<data::KeyStore>,

    /// Follower records
    pub followers: data::FollowerStore,

    /// Local and remote actor resolution
    pub resolver: Arc<federation::ActorResolver>,

    /// Inbound HTTP Signature verification
    pub verifier: Arc<federation::SignatureVerifier>,

    /// Outbound activity delivery
    pub delivery: Arc<federation::ActivityDelivery>,

    /// Inbox state machine
    pub inbox: Arc<federation::InboxProcessor>,
}

impl AppState {
    /// Initialize application state from the configured storage backend
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let store = data::open_store(&config.database).await?;
        tracing::info!(backend = ?config.database.backend, "Storage opened");

        Self::with_store(config, store).await
    }

    /// Initialize application state on top of an already opened store
    ///
    /// # Steps
    /// 1. Build the federation HTTP client
    /// 2. Wire key store, resolver, verifier, delivery and inbox
    /// 3. Ensure the local actor has a key pair
    /// 4. Publish the follower gauge
    pub async fn with_store(
        config: config::AppConfig,
        store: Arc<dyn data::KvStore>,
    ) -> Result<Self, error::AppError> {
        let config = Arc::new(config);

        // 1. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(config.federation.user_agent.as_str())
            .timeout(config.federation.request_timeout())
            .redirect(federation::redirect_policy(
                config.federation.allow_private_hosts,
            ))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let http_client = Arc::new(http_client);

        // 2. Federation components
        let keys = Arc::new(data::KeyStore::new(store.clone(), config.federation.key_bits));
        let followers = data::FollowerStore::new(store);
        let resolver = Arc::new(federation::ActorResolver::new(
            config.clone(),
            keys.clone(),
            http_client.clone(),
        ));
        let verifier = Arc::new(federation::SignatureVerifier::new(
            resolver.clone(),
            config.federation.signature_max_skew_seconds,
        ));
        let delivery = Arc::new(federation::ActivityDelivery::new(
            http_client,
            federation::RetryPolicy::from_config(&config.federation.delivery),
            config.federation.allow_private_hosts,
        ));
        let inbox = Arc::new(federation::InboxProcessor::new(
            config.clone(),
            followers.clone(),
            keys.clone(),
            resolver.clone(),
            delivery.clone(),
        ));

        // 3. Local key pair
        let key_pair = keys.get_or_create(&config.actor.handle).await?;
        tracing::info!(
            handle = %config.actor.handle,
            key_created_at = %key_pair.created_at(),
            "Local actor key ready"
        );

        // 4. Follower gauge
        followers.refresh_gauge().await?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config,
            keys,
            followers,
            resolver,
            verifier,
            delivery,
            inbox,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, extract::DefaultBodyLimit, middleware};
    use tower::ServiceBuilder;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::home_router())
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .fallback(|| async { error::AppError::NotFound })
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(api::track_http_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
