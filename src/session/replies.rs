//! Upstream JSON reply decoding.

use serde::Deserialize;
use thiserror::Error;

use crate::session::Slot;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("invalid {slot} reply: {source}")]
    Json {
        slot: Slot,
        #[source]
        source: serde_json::Error,
    },
}

/// `{"name": ..., "surname": ...}` from the name service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NameReply {
    pub name: String,
    pub surname: String,
}

/// `{"value": {"joke": ...}}` from the joke service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JokeReply {
    pub value: JokeValue,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JokeValue {
    pub joke: String,
}

/// A decoded upstream reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Name { name: String, surname: String },
    Joke(String),
}

/// Decode the body received from `slot`'s service. Unknown fields are ignored.
pub fn decode_reply(slot: Slot, body: &[u8]) -> Result<Reply, ReplyError> {
    let wrap = |source| ReplyError::Json { slot, source };
    match slot {
        Slot::NameService => {
            let reply: NameReply = serde_json::from_slice(body).map_err(wrap)?;
            Ok(Reply::Name {
                name: reply.name,
                surname: reply.surname,
            })
        }
        Slot::JokeService => {
            let reply: JokeReply = serde_json::from_slice(body).map_err(wrap)?;
            Ok(Reply::Joke(reply.value.joke))
        }
    }
}
