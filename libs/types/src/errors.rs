//! Error types for the message model
//!
//! A `DecodeError` always describes exactly one frame. Callers recover at
//! frame scope: the stream that produced the frame keeps going.

use thiserror::Error;

use crate::message::MessageType;

/// Failure to turn one frame payload into a [`crate::message::Message`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no numeric Type field")]
    MissingType,

    #[error("Type {0} is out of range")]
    TypeOutOfRange(u64),

    #[error("invalid {message_type} payload: {source}")]
    InvalidFields {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
}
