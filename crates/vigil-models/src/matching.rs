//! Face match results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Display name used for unmatched faces.
pub const STRANGER_NAME: &str = "stranger";

/// Outcome of matching one face against the known-person registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchResult {
    /// `None` for strangers
    pub person_id: Option<i64>,
    pub name: String,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
    /// Cosine similarity of the best candidate, 0 when there was none
    pub similarity: f32,
    pub is_stranger: bool,
}

impl MatchResult {
    pub fn stranger(similarity: f32) -> Self {
        Self {
            person_id: None,
            name: STRANGER_NAME.to_string(),
            group_id: None,
            group_name: None,
            similarity,
            is_stranger: true,
        }
    }

    pub fn known(
        person_id: Option<i64>,
        name: impl Into<String>,
        group_id: Option<i64>,
        group_name: Option<String>,
        similarity: f32,
    ) -> Self {
        Self {
            person_id,
            name: name.into(),
            group_id,
            group_name,
            similarity,
            is_stranger: false,
        }
    }
}
