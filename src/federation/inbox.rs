//! Inbox state machine
//!
//! Applies verified inbound activities to the follower store and schedules
//! the responses they call for.

use std::sync::Arc;

use super::activity::{Activity, ActivityKind, ObjectRef};
use super::actor::ActorResolver;
use super::delivery::{ActivityDelivery, SigningIdentity, builder};
use super::guard::url_host;
use crate::config::AppConfig;
use crate::data::{FollowerStore, KeyStore, RecordOutcome};
use crate::error::AppError;

/// What processing an activity did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Follow recorded (or already on record) and Accept dispatched
    FollowAccepted {
        follow_id: String,
        follower: String,
        newly_recorded: bool,
    },
    /// Follow from a blocked domain; Reject dispatched
    FollowRejected { follower: String },
    /// A follower record was removed by Undo
    Unfollowed { follow_id: String },
    /// A remote actor deleted itself
    ActorRemoved { actor: String, removed: usize },
    /// Nothing changed
    Ignored { reason: &'static str },
}

impl InboxOutcome {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            InboxOutcome::FollowAccepted { .. } => "accepted",
            InboxOutcome::FollowRejected { .. } => "rejected",
            InboxOutcome::Unfollowed { .. } => "unfollowed",
            InboxOutcome::ActorRemoved { .. } => "actor_removed",
            InboxOutcome::Ignored { .. } => "ignored",
        }
    }
}

fn ignored(reason: &'static str) -> InboxOutcome {
    InboxOutcome::Ignored { reason }
}

/// Inbox processor
pub struct InboxProcessor {
    config: Arc<AppConfig>,
    followers: FollowerStore,
    keys: Arc<KeyStore>,
    resolver: Arc<ActorResolver>,
    delivery: Arc<ActivityDelivery>,
}

impl InboxProcessor {
    pub fn new(
        config: Arc<AppConfig>,
        followers: FollowerStore,
        keys: Arc<KeyStore>,
        resolver: Arc<ActorResolver>,
        delivery: Arc<ActivityDelivery>,
    ) -> Self {
        Self {
            config,
            followers,
            keys,
            resolver,
            delivery,
        }
    }

    /// Apply one verified activity.
    ///
    /// Unhandled variants are no-ops, never errors. Storage and key failures
    /// propagate.
    pub async fn process(&self, activity: Activity) -> Result<InboxOutcome, AppError> {
        let actor = activity.actor.clone();
        let outcome = match activity.kind {
            ActivityKind::Follow { object } => {
                self.handle_follow(activity.id, &actor, &object).await?
            }
            ActivityKind::Undo { object } => self.handle_undo(&actor, object).await?,
            ActivityKind::Accept { object } | ActivityKind::Reject { object } => {
                tracing::info!(
                    %actor,
                    object = object.id().unwrap_or("<none>"),
                    "Ignoring Accept/Reject; no outgoing Follow is pending"
                );
                ignored("no pending follow")
            }
            ActivityKind::Delete { object } => self.handle_delete(&actor, &object).await?,
            ActivityKind::Other { activity_type } => {
                tracing::debug!(%actor, %activity_type, "Ignoring unhandled activity type");
                ignored("unhandled type")
            }
        };

        Ok(outcome)
    }

    async fn handle_follow(
        &self,
        follow_id: Option<String>,
        actor: &str,
        object: &str,
    ) -> Result<InboxOutcome, AppError> {
        if !self.resolver.is_local_actor_ref(object) {
            tracing::info!(%actor, target = %object, "Ignoring Follow of a non-local actor");
            return Ok(ignored("follow target is not local"));
        }

        let Some(follow_id) = follow_id else {
            tracing::info!(%actor, "Ignoring Follow without an id");
            return Ok(ignored("follow without id"));
        };

        let local_actor = self.resolver.local_actor_uri();
        if actor == local_actor {
            return Ok(ignored("self follow"));
        }

        let follower = match self.resolver.resolve_remote(actor).await {
            Ok(follower) => follower,
            Err(error) => {
                tracing::warn!(%actor, %error, "Ignoring Follow from unresolvable actor");
                return Ok(ignored("unknown actor"));
            }
        };

        let follow = builder::follow_object(&follow_id, actor, &local_actor);
        let signer = self.signer().await?;

        let blocked = url_host(actor)
            .is_some_and(|host| self.config.federation.is_domain_blocked(&host));
        if blocked {
            tracing::info!(%actor, "Rejecting Follow from blocked domain");
            self.delivery.dispatch(
                builder::reject(&local_actor, follow),
                follower.inbox.clone(),
                signer,
            );
            return Ok(InboxOutcome::FollowRejected {
                follower: actor.to_string(),
            });
        }

        let recorded = self.followers.record(&follow_id, actor).await?;
        match recorded {
            RecordOutcome::Inserted => tracing::info!(%actor, %follow_id, "New follower"),
            RecordOutcome::AlreadyRecorded => {
                tracing::debug!(%actor, %follow_id, "Follow already on record; re-sending Accept")
            }
        }

        self.delivery.dispatch(
            builder::accept(&local_actor, follow),
            follower.inbox.clone(),
            signer,
        );

        Ok(InboxOutcome::FollowAccepted {
            follow_id,
            follower: actor.to_string(),
            newly_recorded: recorded == RecordOutcome::Inserted,
        })
    }

    async fn handle_undo(&self, actor: &str, object: ObjectRef) -> Result<InboxOutcome, AppError> {
        let follow_id = match object {
            ObjectRef::Uri(uri) => uri,
            ObjectRef::Activity(inner) => match (inner.kind, inner.id) {
                (ActivityKind::Follow { .. }, Some(id)) => id,
                (ActivityKind::Follow { .. }, None) => {
                    tracing::info!(%actor, "Ignoring Undo of a Follow without an id");
                    return Ok(ignored("undo of follow without id"));
                }
                (kind, _) => {
                    tracing::debug!(%actor, activity_type = kind.type_name(), "Ignoring Undo of non-Follow activity");
                    return Ok(ignored("undo of non-follow"));
                }
            },
            ObjectRef::Object { object_type, .. } => {
                tracing::debug!(%actor, object_type = ?object_type, "Ignoring Undo of non-Follow object");
                return Ok(ignored("undo of non-follow"));
            }
            ObjectRef::Malformed(reason) => {
                tracing::warn!(%actor, %reason, "Ignoring Undo with malformed object");
                return Ok(ignored("malformed undo object"));
            }
        };

        let Some(record) = self.followers.get(&follow_id).await? else {
            tracing::debug!(%actor, %follow_id, "Ignoring Undo of unknown Follow");
            return Ok(ignored("unknown follow"));
        };

        if record.actor_uri != actor {
            tracing::warn!(
                %actor,
                owner = %record.actor_uri,
                %follow_id,
                "Ignoring Undo of another actor's Follow"
            );
            return Ok(ignored("follow belongs to another actor"));
        }

        if self.followers.remove(&follow_id).await? {
            tracing::info!(%actor, %follow_id, "Follower removed");
            Ok(InboxOutcome::Unfollowed { follow_id })
        } else {
            Ok(ignored("unknown follow"))
        }
    }

    async fn handle_delete(&self, actor: &str, object: &ObjectRef) -> Result<InboxOutcome, AppError> {
        if object.id() != Some(actor) {
            tracing::debug!(%actor, "Ignoring Delete of an object other than the actor");
            return Ok(ignored("delete of other object"));
        }

        let removed = self.followers.remove_actor(actor).await?;
        self.resolver.invalidate(actor).await;
        tracing::info!(%actor, removed, "Remote actor deleted");

        Ok(InboxOutcome::ActorRemoved {
            actor: actor.to_string(),
            removed,
        })
    }

    async fn signer(&self) -> Result<SigningIdentity, AppError> {
        Ok(SigningIdentity {
            key_id: self.resolver.local_key_id(),
            key_pair: self.keys.get_or_create(&self.config.actor.handle).await?,
        })
    }
}
