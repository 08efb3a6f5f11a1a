//! Actor documents and resolution
//!
//! The local actor is built from configuration and the key store; remote
//! actors are fetched over HTTP (signed GET) and cached with a TTL.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::guard;
use super::signature::sign_request;
use crate::config::AppConfig;
use crate::data::KeyStore;
use crate::error::AppError;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

pub const ACTIVITY_JSON: &str = "application/activity+json";
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

const ACCEPT_ACTOR: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
const CACHE_NAME: &str = "actor";

/// Public key advertised by an actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

/// The parts of an actor document this server relies on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub actor_type: String,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub followers: Option<String>,
    pub public_keys: Vec<PublicKey>,
}

impl Actor {
    /// Parse an actor document.
    ///
    /// `publicKey` may be a single object or an array; keys without an owner
    /// are attributed to the actor.
    pub fn from_document(doc: &Value) -> Result<Self, AppError> {
        let str_field = |name: &str| doc.get(name).and_then(Value::as_str).map(str::to_string);

        let id = str_field("id")
            .ok_or_else(|| AppError::MalformedActor("actor document has no id".to_string()))?;
        let actor_type = str_field("type")
            .ok_or_else(|| AppError::MalformedActor(format!("actor {} has no type", id)))?;
        let inbox = str_field("inbox")
            .ok_or_else(|| AppError::MalformedActor(format!("actor {} has no inbox", id)))?;

        let key_values: Vec<&Value> = match doc.get("publicKey") {
            Some(Value::Array(keys)) => keys.iter().collect(),
            Some(key @ Value::Object(_)) => vec![key],
            _ => Vec::new(),
        };

        let public_keys: Vec<PublicKey> = key_values
            .into_iter()
            .filter_map(|key| {
                let key_id = key.get("id")?.as_str()?;
                let pem = key.get("publicKeyPem")?.as_str()?;
                let owner = key.get("owner").and_then(Value::as_str).unwrap_or(&id);
                Some(PublicKey {
                    id: key_id.to_string(),
                    owner: owner.to_string(),
                    public_key_pem: pem.to_string(),
                })
            })
            .collect();

        if public_keys.is_empty() {
            return Err(AppError::MalformedActor(format!(
                "actor {} has no usable publicKey",
                id
            )));
        }

        let shared_inbox = doc
            .get("endpoints")
            .and_then(|endpoints| endpoints.get("sharedInbox"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            actor_type,
            preferred_username: str_field("preferredUsername"),
            name: str_field("name"),
            summary: str_field("summary"),
            shared_inbox,
            followers: str_field("followers"),
            inbox,
            public_keys,
            id,
        })
    }

    /// Render the actor as a JSON-LD document.
    pub fn to_document(&self) -> Value {
        let mut doc = json!({
            "@context": [AS_CONTEXT, SECURITY_CONTEXT],
            "id": self.id,
            "type": self.actor_type,
            "inbox": self.inbox,
            "url": self.id,
            "manuallyApprovesFollowers": false,
        });

        if let Some(username) = &self.preferred_username {
            doc["preferredUsername"] = json!(username);
        }
        if let Some(name) = &self.name {
            doc["name"] = json!(name);
        }
        if let Some(summary) = &self.summary {
            doc["summary"] = json!(summary);
        }
        if let Some(followers) = &self.followers {
            doc["followers"] = json!(followers);
        }
        if let Some(shared_inbox) = &self.shared_inbox {
            doc["endpoints"] = json!({ "sharedInbox": shared_inbox });
        }

        let keys: Vec<Value> = self
            .public_keys
            .iter()
            .map(|key| {
                json!({
                    "id": key.id,
                    "owner": key.owner,
                    "publicKeyPem": key.public_key_pem,
                })
            })
            .collect();
        doc["publicKey"] = match keys.len() {
            1 => keys.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(keys),
        };

        doc
    }

    /// Key advertised under `key_id`.
    ///
    /// A bare actor URI as key id selects the only key, when there is one.
    pub fn key(&self, key_id: &str) -> Option<&PublicKey> {
        self.public_keys
            .iter()
            .find(|key| key.id == key_id)
            .or_else(|| match self.public_keys.as_slice() {
                [only] if key_id == self.id => Some(only),
                _ => None,
            })
    }
}

/// Drop the fragment from an actor or key URI.
pub fn strip_fragment(uri: &str) -> &str {
    uri.split('#').next().unwrap_or(uri)
}

/// A key together with the actor that owns it
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub actor: Arc<Actor>,
    pub key: PublicKey,
    /// `true` when the actor document was fetched by this call
    pub fetched: bool,
}

/// Actor resolver
///
/// Produces actor documents for the local account and for remote URIs.
pub struct ActorResolver {
    config: Arc<AppConfig>,
    keys: Arc<KeyStore>,
    http_client: Arc<reqwest::Client>,
    cache: moka::future::Cache<String, Arc<Actor>>,
}

impl ActorResolver {
    pub fn new(config: Arc<AppConfig>, keys: Arc<KeyStore>, http_client: Arc<reqwest::Client>) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(config.federation.actor_cache_capacity)
            .time_to_live(config.federation.actor_cache_ttl())
            .build();

        Self {
            config,
            keys,
            http_client,
            cache,
        }
    }

    pub fn local_actor_uri(&self) -> String {
        self.config.actor_uri()
    }

    pub fn local_key_id(&self) -> String {
        format!("{}#main-key", self.local_actor_uri())
    }

    pub fn is_local_handle(&self, handle: &str) -> bool {
        handle == self.config.actor.handle
    }

    /// Whether a Follow target names the local actor.
    ///
    /// Accepts `handle@domain` (optionally `acct:`-prefixed) and the actor
    /// URI or its `/@handle` alias on the configured scheme, host and port.
    pub fn is_local_actor_ref(&self, target: &str) -> bool {
        let target = target.trim();
        let handle = &self.config.actor.handle;

        let account = match target.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("acct:") => &target[5..],
            _ => target,
        };
        let address = format!("{}@{}", handle, self.config.server.domain);
        if account.eq_ignore_ascii_case(&address) {
            return true;
        }

        let (Ok(target), Ok(local)) = (
            url::Url::parse(target),
            url::Url::parse(&self.config.server.base_url()),
        ) else {
            return false;
        };
        if target.scheme() != local.scheme()
            || target.host() != local.host()
            || target.port_or_known_default() != local.port_or_known_default()
        {
            return false;
        }

        let path = target.path().trim_end_matches('/');
        path == format!("/users/{}", handle) || path == format!("/@{}", handle)
    }

    /// Build the local actor for `handle`.
    ///
    /// Returns `None` for any handle other than the configured one.
    pub async fn resolve_local(&self, handle: &str) -> Result<Option<Actor>, AppError> {
        if !self.is_local_handle(handle) {
            return Ok(None);
        }

        let key_pair = self.keys.get_or_create(handle).await?;
        let base_url = self.config.server.base_url();
        let id = self.local_actor_uri();
        let summary = &self.config.actor.summary;

        Ok(Some(Actor {
            actor_type: "Person".to_string(),
            preferred_username: Some(handle.to_string()),
            name: Some(self.config.actor.display_name.clone()),
            summary: (!summary.is_empty()).then(|| summary.clone()),
            inbox: format!("{}/inbox", id),
            shared_inbox: Some(format!("{}/inbox", base_url)),
            followers: Some(format!("{}/followers", id)),
            public_keys: vec![PublicKey {
                id: self.local_key_id(),
                owner: id.clone(),
                public_key_pem: key_pair.public_key_pem().to_string(),
            }],
            id,
        }))
    }

    /// Resolve an actor URI, using the cache when possible.
    pub async fn resolve_remote(&self, uri: &str) -> Result<Arc<Actor>, AppError> {
        self.resolve_tracked(uri).await.map(|(actor, _)| actor)
    }

    /// Resolve the actor owning `key_id` and select the advertised key.
    pub async fn resolve_key(&self, key_id: &str) -> Result<ResolvedKey, AppError> {
        let (actor, fetched) = self.resolve_tracked(strip_fragment(key_id)).await?;
        let key = actor.key(key_id).cloned().ok_or_else(|| {
            AppError::MalformedActor(format!("actor {} does not advertise key {}", actor.id, key_id))
        })?;

        Ok(ResolvedKey {
            actor,
            key,
            fetched,
        })
    }

    /// Forget a cached actor so the next resolution refetches it.
    pub async fn invalidate(&self, uri: &str) {
        self.cache.invalidate(strip_fragment(uri)).await;
    }

    async fn resolve_tracked(&self, uri: &str) -> Result<(Arc<Actor>, bool), AppError> {
        let uri = strip_fragment(uri);

        if uri == self.local_actor_uri() {
            let actor = self
                .resolve_local(&self.config.actor.handle)
                .await?
                .ok_or(AppError::NotFound)?;
            return Ok((Arc::new(actor), false));
        }

        if let Some(actor) = self.cache.get(uri).await {
            CACHE_HITS_TOTAL.with_label_values(&[CACHE_NAME]).inc();
            return Ok((actor, false));
        }
        CACHE_MISSES_TOTAL.with_label_values(&[CACHE_NAME]).inc();

        // Concurrent misses for one URI share a single fetch.
        let fetched = AtomicBool::new(false);
        let actor = self
            .cache
            .try_get_with(uri.to_string(), async {
                fetched.store(true, Ordering::Relaxed);
                self.fetch(uri).await.map(Arc::new)
            })
            .await
            .map_err(|error| unshare(&error))?;

        Ok((actor, fetched.load(Ordering::Relaxed)))
    }

    async fn fetch(&self, uri: &str) -> Result<Actor, AppError> {
        let url = guard::check_remote_url(uri, self.config.federation.allow_private_hosts)
            .await
            .map_err(AppError::RemoteFetch)?;

        let key_pair = self.keys.get_or_create(&self.config.actor.handle).await?;
        let signed = sign_request(
            "GET",
            url.as_str(),
            None,
            key_pair.private_key(),
            &self.local_key_id(),
        )?;

        let response = self
            .http_client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_ACTOR)
            .header("Date", signed.date)
            .header("Signature", signed.signature)
            .send()
            .await
            .map_err(|e| AppError::RemoteFetch(format!("failed to fetch {}: {}", uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteFetch(format!(
                "failed to fetch {}: HTTP {}",
                uri, status
            )));
        }

        let doc: Value = response
            .json()
            .await
            .map_err(|e| AppError::MalformedActor(format!("{} is not JSON: {}", uri, e)))?;
        let actor = Actor::from_document(&doc)?;

        if guard::url_host(&actor.id) != url.host_str().map(|host| host.to_ascii_lowercase()) {
            return Err(AppError::MalformedActor(format!(
                "actor id {} is not hosted at {}",
                actor.id, uri
            )));
        }

        tracing::debug!(actor = %actor.id, "Fetched remote actor");
        Ok(actor)
    }

    #[cfg(test)]
    pub(crate) async fn prime(&self, actor: Actor) {
        self.cache.insert(actor.id.clone(), Arc::new(actor)).await;
    }
}

/// Rebuild an owned error from one shared by the cache loader.
fn unshare(error: &AppError) -> AppError {
    match error {
        AppError::Storage(msg) => AppError::Storage(msg.clone()),
        AppError::KeyFormat(msg) => AppError::KeyFormat(msg.clone()),
        AppError::MalformedActor(msg) => AppError::MalformedActor(msg.clone()),
        AppError::RemoteFetch(msg) => AppError::RemoteFetch(msg.clone()),
        other => AppError::RemoteFetch(other.to_string()),
    }
}
