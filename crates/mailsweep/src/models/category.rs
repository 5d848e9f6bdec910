//! Category model for downstream message classification

use serde::{Deserialize, Serialize};

/// A user-defined mail category. Downstream processing picks one of the
/// owner's categories (or none) per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl Category {
    pub fn new(owner_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            owner_id,
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
