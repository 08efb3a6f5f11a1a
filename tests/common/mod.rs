//! Common test utilities for E2E tests

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use solofed::federation::sign_request;
use solofed::{AppState, config};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const LOCAL_HANDLE: &str = "testuser";
pub const LOCAL_DOMAIN: &str = "test.example.com";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Configuration used by every test server
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: LOCAL_DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig {
            backend: config::StorageBackend::Sqlite,
            path: db_path,
        },
        actor: config::ActorConfig {
            handle: LOCAL_HANDLE.to_string(),
            display_name: "Test User".to_string(),
            summary: "Test account".to_string(),
        },
        federation: config::FederationConfig {
            key_bits: 1024,
            signature_max_skew_seconds: 300,
            actor_cache_ttl_seconds: 3600,
            actor_cache_capacity: 100,
            allow_private_hosts: true,
            blocked_domains: Vec::new(),
            user_agent: "solofed-e2e".to_string(),
            request_timeout_seconds: 5,
            delivery: config::DeliveryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 10,
            },
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        solofed::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        adjust(&mut config);

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = solofed::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Public URI of the local actor
    pub fn actor_uri(&self) -> String {
        format!("https://{}/users/{}", LOCAL_DOMAIN, LOCAL_HANDLE)
    }

    /// Sign `activity` as `remote` and POST it to `path`.
    pub async fn post_signed(&self, path: &str, activity: &Value, remote: &MockRemote) -> reqwest::Response {
        let body = serde_json::to_vec(activity).unwrap();
        self.post_signed_bytes(path, body.clone(), &body, remote).await
    }

    /// POST `sent` while signing over `signed`; differing values model tampering.
    pub async fn post_signed_bytes(
        &self,
        path: &str,
        sent: Vec<u8>,
        signed: &[u8],
        remote: &MockRemote,
    ) -> reqwest::Response {
        let url = self.url(path);
        let headers = sign_request(
            "POST",
            &url,
            Some(signed),
            remote.private_key(),
            &remote.key_id(),
        )
        .unwrap();

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/activity+json")
            .header("Date", headers.date)
            .header("Signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("Digest", digest);
        }

        request.body(sent).send().await.unwrap()
    }

    /// Follower actor URIs as stored
    pub async fn follower_uris(&self) -> Vec<String> {
        self.state.followers.unique_actor_uris().await.unwrap()
    }
}

/// Build a Follow activity from `remote` to the local actor
pub fn follow_activity(server: &TestServer, remote: &MockRemote, suffix: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/follows/{}", remote.actor_uri(), suffix),
        "type": "Follow",
        "actor": remote.actor_uri(),
        "object": server.actor_uri(),
    })
}

/// Build an Undo wrapping `follow`
pub fn undo_activity(remote: &MockRemote, follow: &Value, suffix: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/undos/{}", remote.actor_uri(), suffix),
        "type": "Undo",
        "actor": remote.actor_uri(),
        "object": follow,
    })
}

struct MockState {
    actor_doc: Value,
    inbox_bodies: Mutex<Vec<Value>>,
    actor_fetches: AtomicUsize,
}

/// A fake remote instance hosting one actor and its inbox
pub struct MockRemote {
    base_url: String,
    username: String,
    private_key: RsaPrivateKey,
    state: Arc<MockState>,
}

async fn serve_actor(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.actor_fetches.fetch_add(1, Ordering::SeqCst);
    Json(state.actor_doc.clone())
}

async fn receive(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> StatusCode {
    state.inbox_bodies.lock().unwrap().push(body);
    StatusCode::ACCEPTED
}

impl MockRemote {
    pub async fn spawn(username: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public_key_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let id = format!("{}/users/{}", base_url, username);
        let actor_doc = json!({
            "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
            "id": id,
            "type": "Person",
            "preferredUsername": username,
            "inbox": format!("{}/inbox", id),
            "endpoints": { "sharedInbox": format!("{}/inbox", base_url) },
            "publicKey": {
                "id": format!("{}#main-key", id),
                "owner": id,
                "publicKeyPem": public_key_pem,
            }
        });

        let state = Arc::new(MockState {
            actor_doc,
            inbox_bodies: Mutex::new(Vec::new()),
            actor_fetches: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route(&format!("/users/{}", username), get(serve_actor))
            .route(&format!("/users/{}/inbox", username), post(receive))
            .route("/inbox", post(receive))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            username: username.to_string(),
            private_key,
            state,
        }
    }

    pub fn actor_uri(&self) -> String {
        format!("{}/users/{}", self.base_url, self.username)
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_uri())
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn actor_fetches(&self) -> usize {
        self.state.actor_fetches.load(Ordering::SeqCst)
    }

    pub fn inbox_bodies(&self) -> Vec<Value> {
        self.state.inbox_bodies.lock().unwrap().clone()
    }

    /// Poll until at least `count` deliveries arrived or a timeout passes.
    pub async fn wait_for_deliveries(&self, count: usize) -> Vec<Value> {
        for _ in 0..300 {
            let bodies = self.inbox_bodies();
            if bodies.len() >= count {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.inbox_bodies()
    }
}
