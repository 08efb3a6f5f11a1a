//! Shared helpers for unit tests: an in-process remote instance.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const REMOTE_USERNAME: &str = "bob";

pub(crate) fn remote_actor_document(base_url: &str, username: &str, public_key_pem: &str) -> Value {
    let id = format!("{}/users/{}", base_url, username);
    json!({
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
    })
}

struct MockState {
    actor_doc: Mutex<Value>,
    inbox_status: AtomicU16,
    inbox_bodies: Mutex<Vec<Value>>,
    actor_fetches: AtomicUsize,
    last_signature: Mutex<Option<String>>,
}

/// A fake remote server hosting one actor and its inbox
pub(crate) struct MockRemote {
    base_url: String,
    private_key: RsaPrivateKey,
    state: Arc<MockState>,
}

async fn serve_actor(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Json<Value> {
    state.actor_fetches.fetch_add(1, Ordering::SeqCst);
    let signature = headers
        .get("signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    *state.last_signature.lock().unwrap() = signature;
    Json(state.actor_doc.lock().unwrap().clone())
}

async fn receive(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> StatusCode {
    state.inbox_bodies.lock().unwrap().push(body);
    StatusCode::from_u16(state.inbox_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl MockRemote {
    pub(crate) async fn spawn(inbox_status: StatusCode) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public_key_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let state = Arc::new(MockState {
            actor_doc: Mutex::new(remote_actor_document(
                &base_url,
                REMOTE_USERNAME,
                &public_key_pem,
            )),
            inbox_status: AtomicU16::new(inbox_status.as_u16()),
            inbox_bodies: Mutex::new(Vec::new()),
            actor_fetches: AtomicUsize::new(0),
            last_signature: Mutex::new(None),
        });

        let app = Router::new()
            .route(&format!("/users/{}", REMOTE_USERNAME), get(serve_actor))
            .route(&format!("/users/{}/inbox", REMOTE_USERNAME), post(receive))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            private_key,
            state,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn actor_uri(&self) -> String {
        format!("{}/users/{}", self.base_url, REMOTE_USERNAME)
    }

    pub(crate) fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_uri())
    }

    pub(crate) fn inbox_uri(&self) -> String {
        format!("{}/inbox", self.actor_uri())
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Swap the advertised key, as a remote key rotation would.
    pub(crate) fn rotate_key(&mut self) {
        self.private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = self
            .private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        *self.state.actor_doc.lock().unwrap() =
            remote_actor_document(&self.base_url, REMOTE_USERNAME, &pem);
    }

    pub(crate) fn actor_fetches(&self) -> usize {
        self.state.actor_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn last_fetch_signature(&self) -> Option<String> {
        self.state.last_signature.lock().unwrap().clone()
    }

    pub(crate) fn inbox_bodies(&self) -> Vec<Value> {
        self.state.inbox_bodies.lock().unwrap().clone()
    }

    /// Poll until at least `count` deliveries arrived or a timeout passes.
    pub(crate) async fn wait_for_deliveries(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let bodies = self.inbox_bodies();
            if bodies.len() >= count {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.inbox_bodies()
    }
}
