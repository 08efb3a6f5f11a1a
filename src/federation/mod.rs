//! ActivityPub federation module
//!
//! Handles:
//! - Actor documents and remote actor resolution
//! - HTTP Signatures
//! - Inbox processing
//! - Activity delivery
//! - WebFinger

mod activity;
mod actor;
mod delivery;
mod guard;
mod inbox;
mod signature;
mod webfinger;

pub use activity::{Activity, ActivityKind, ObjectRef};
pub use actor::{ACTIVITY_JSON, Actor, ActorResolver, PublicKey, ResolvedKey};
pub use delivery::{ActivityDelivery, DeliveryResult, RetryPolicy, SigningIdentity, builder};
pub use guard::redirect_policy;
pub use inbox::{InboxOutcome, InboxProcessor};
pub use signature::{
    ParsedSignature, RejectReason, SignatureHeaders, SignatureVerifier, SignedRequest,
    Verification, generate_digest, key_id_matches_actor, parse_signature_header, sign_request,
    verify_signature,
};
pub use webfinger::{
    WebFingerLink, WebFingerResponse, generate_webfinger_response, local_handle_for_resource,
};
