//! Activity model
//!
//! Inbound JSON is parsed once into a tagged [`Activity`]; handlers match on
//! [`ActivityKind`] instead of probing raw JSON.

use serde_json::Value;

use crate::error::AppError;

/// Nesting depth accepted for embedded activities (Undo { Follow { .. } })
const MAX_EMBED_DEPTH: usize = 4;

/// A parsed inbound activity
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: Option<String>,
    pub actor: String,
    pub kind: ActivityKind,
}

/// Activity variants this server distinguishes
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    Follow { object: String },
    Undo { object: ObjectRef },
    Accept { object: ObjectRef },
    Reject { object: ObjectRef },
    Delete { object: ObjectRef },
    Other { activity_type: String },
}

/// The `object` of an activity
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    /// A bare URI
    Uri(String),
    /// An embedded activity that parsed
    Activity(Box<Activity>),
    /// Some other embedded object
    Object {
        id: Option<String>,
        object_type: Option<String>,
    },
    /// Present but unusable, with the reason
    Malformed(String),
}

impl ObjectRef {
    /// URI the object refers to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            ObjectRef::Uri(uri) => Some(uri),
            ObjectRef::Activity(activity) => activity.id.as_deref(),
            ObjectRef::Object { id, .. } => id.as_deref(),
            ObjectRef::Malformed(_) => None,
        }
    }
}

impl ActivityKind {
    pub fn type_name(&self) -> &str {
        match self {
            ActivityKind::Follow { .. } => "Follow",
            ActivityKind::Undo { .. } => "Undo",
            ActivityKind::Accept { .. } => "Accept",
            ActivityKind::Reject { .. } => "Reject",
            ActivityKind::Delete { .. } => "Delete",
            ActivityKind::Other { activity_type } => activity_type,
        }
    }
}

fn is_known_type(activity_type: &str) -> bool {
    matches!(
        activity_type,
        "Follow" | "Undo" | "Accept" | "Reject" | "Delete"
    )
}

/// Read an id that may be a plain string or an object carrying `id`.
fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(uri) if !uri.trim().is_empty() => Some(uri.trim().to_string()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|uri| !uri.trim().is_empty())
            .map(|uri| uri.trim().to_string()),
        _ => None,
    }
}

impl Activity {
    /// Parse an inbound activity document.
    ///
    /// # Errors
    /// `Validation` when `type` or `actor` is missing, or when a Follow has
    /// no usable target.
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        Self::parse(value, None, 0)
    }

    fn parse(value: &Value, parent_actor: Option<&str>, depth: usize) -> Result<Self, AppError> {
        let map = value
            .as_object()
            .ok_or_else(|| AppError::Validation("Activity must be a JSON object".to_string()))?;

        let activity_type = match map.get("type") {
            Some(Value::String(t)) => t.clone(),
            // Multi-typed objects use the first entry.
            Some(Value::Array(types)) => types
                .iter()
                .find_map(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AppError::Validation("Missing activity type".to_string()))?,
            _ => return Err(AppError::Validation("Missing activity type".to_string())),
        };

        let actor = match map.get("actor").and_then(id_of) {
            Some(actor) => actor,
            None => parent_actor
                .map(str::to_string)
                .ok_or_else(|| AppError::Validation("Missing activity actor".to_string()))?,
        };

        let id = map.get("id").and_then(Value::as_str).map(str::to_string);
        let object = map.get("object");

        let kind = match activity_type.as_str() {
            "Follow" => ActivityKind::Follow {
                object: object.and_then(id_of).ok_or_else(|| {
                    AppError::Validation("Follow object must be a URI or have an id".to_string())
                })?,
            },
            "Undo" => ActivityKind::Undo {
                object: parse_object(object, &actor, depth),
            },
            "Accept" => ActivityKind::Accept {
                object: parse_object(object, &actor, depth),
            },
            "Reject" => ActivityKind::Reject {
                object: parse_object(object, &actor, depth),
            },
            "Delete" => ActivityKind::Delete {
                object: parse_object(object, &actor, depth),
            },
            _ => ActivityKind::Other { activity_type },
        };

        Ok(Self { id, actor, kind })
    }
}

fn parse_object(object: Option<&Value>, actor: &str, depth: usize) -> ObjectRef {
    match object {
        Some(Value::String(uri)) if !uri.trim().is_empty() => ObjectRef::Uri(uri.trim().to_string()),
        Some(value @ Value::Object(map)) => {
            let object_type = map.get("type").and_then(Value::as_str).map(str::to_string);
            let id = map.get("id").and_then(Value::as_str).map(str::to_string);

            match object_type.as_deref() {
                Some(t) if is_known_type(t) => {
                    if depth >= MAX_EMBED_DEPTH {
                        return ObjectRef::Malformed("activity nested too deeply".to_string());
                    }
                    match Activity::parse(value, Some(actor), depth + 1) {
                        Ok(activity) => ObjectRef::Activity(Box::new(activity)),
                        Err(error) => ObjectRef::Malformed(error.to_string()),
                    }
                }
                _ if id.is_none() && object_type.is_none() => {
                    ObjectRef::Malformed("embedded object has neither id nor type".to_string())
                }
                _ => ObjectRef::Object { id, object_type },
            }
        }
        Some(_) => ObjectRef::Malformed("object is neither a URI nor an object".to_string()),
        None => ObjectRef::Malformed("missing object".to_string()),
    }
}
