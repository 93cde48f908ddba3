use crate::mission::ObjectId;
use serde::{Deserialize, Serialize};

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { object_id: ObjectId },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { object_id: ObjectId },
}

/// Server → Client: Error message
///
/// Replication traffic itself travels as binary frames; only failures are
/// reported as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            object_id: None,
            error,
        }
    }

    pub fn for_mission(object_id: ObjectId, error: String) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::new(error)
        }
    }
}
