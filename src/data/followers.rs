//! Follower relationships
//!
//! One record per accepted Follow, keyed by the Follow activity id:
//! `followers/{activityId}` -> follower actor URI.

use std::collections::HashSet;
use std::sync::Arc;

use super::store::KvStore;
use crate::error::AppError;

const FOLLOWERS_PREFIX: &str = "followers/";

/// An accepted, not yet undone, Follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerRecord {
    /// Id of the Follow activity that created the relationship
    pub follow_id: String,
    /// Actor URI of the follower
    pub actor_uri: String,
}

/// Outcome of recording a Follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new relationship was stored
    Inserted,
    /// The Follow id was already on record (replay or concurrent duplicate)
    AlreadyRecorded,
}

/// Follower relationship store
#[derive(Clone)]
pub struct FollowerStore {
    store: Arc<dyn KvStore>,
}

fn follower_key(follow_id: &str) -> String {
    format!("{}{}", FOLLOWERS_PREFIX, follow_id)
}

impl FollowerStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Record an accepted Follow.
    ///
    /// The first write for a Follow id wins; replays leave the stored record
    /// untouched.
    pub async fn record(&self, follow_id: &str, actor_uri: &str) -> Result<RecordOutcome, AppError> {
        let inserted = self
            .store
            .insert_if_absent(&follower_key(follow_id), actor_uri)
            .await?;

        if inserted {
            crate::metrics::FOLLOWERS_TOTAL.inc();
            Ok(RecordOutcome::Inserted)
        } else {
            Ok(RecordOutcome::AlreadyRecorded)
        }
    }

    /// Look up the record created by a Follow id.
    pub async fn get(&self, follow_id: &str) -> Result<Option<FollowerRecord>, AppError> {
        let Some(raw) = self.store.get(&follower_key(follow_id)).await? else {
            return Ok(None);
        };
        Ok(decode_record(follow_id, &raw))
    }

    /// Remove the record for a Follow id. Returns `true` when one existed.
    pub async fn remove(&self, follow_id: &str) -> Result<bool, AppError> {
        let removed = self.store.delete(&follower_key(follow_id)).await?;
        if removed {
            crate::metrics::FOLLOWERS_TOTAL.dec();
        }
        Ok(removed)
    }

    /// Remove every record whose follower is `actor_uri`.
    ///
    /// Runs on its own task so a dropped caller cannot leave the actor
    /// half removed. Returns the number of records removed.
    pub async fn remove_actor(&self, actor_uri: &str) -> Result<usize, AppError> {
        let followers = self.clone();
        let actor_uri = actor_uri.to_string();

        tokio::spawn(async move {
            let mut removed = 0;
            for record in followers.list().await? {
                if record.actor_uri == actor_uri && followers.remove(&record.follow_id).await? {
                    removed += 1;
                }
            }
            Ok::<_, AppError>(removed)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    /// All follower records, ordered by Follow id.
    pub async fn list(&self) -> Result<Vec<FollowerRecord>, AppError> {
        let entries = self.store.list_prefix(FOLLOWERS_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, raw)| {
                let follow_id = key.strip_prefix(FOLLOWERS_PREFIX)?;
                decode_record(follow_id, &raw)
            })
            .collect())
    }

    /// Follower actor URIs without duplicates, in first-seen order.
    pub async fn unique_actor_uris(&self) -> Result<Vec<String>, AppError> {
        let mut seen = HashSet::new();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter_map(|record| seen.insert(record.actor_uri.clone()).then_some(record.actor_uri))
            .collect())
    }

    /// Sync the follower gauge with the stored records.
    pub async fn refresh_gauge(&self) -> Result<(), AppError> {
        let count = self.list().await?.len();
        crate::metrics::FOLLOWERS_TOTAL.set(count as i64);
        Ok(())
    }
}

/// The stored value is the bare follower actor URI.
fn decode_record(follow_id: &str, raw: &str) -> Option<FollowerRecord> {
    match url::Url::parse(raw) {
        Ok(_) => Some(FollowerRecord {
            follow_id: follow_id.to_string(),
            actor_uri: raw.to_string(),
        }),
        Err(error) => {
            tracing::warn!(%follow_id, %error, "Skipping undecodable follower record");
            None
        }
    }
}
