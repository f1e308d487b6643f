use serde::{Deserialize, Serialize};

/// The authenticated identity attached to a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}
