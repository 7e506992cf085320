use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who started an operation. Recorded for audit only; validation rules apply
/// the same way to every initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Initiator {
    User(Uuid),
    ApiKey(Uuid),
    System,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::ApiKey(id) => write!(f, "api_key:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}
