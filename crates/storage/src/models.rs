use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Raw row of the `tags` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TagRow {
    pub tag_id: String,
    pub kind: String,
    pub content: String,
    pub title: String,
    pub description: Option<String>,
    pub groups_json: String,
    pub locale: Option<String>,
    pub created_at: i64,
}

impl TagRow {
    pub fn groups(&self) -> Vec<String> {
        serde_json::from_str(&self.groups_json).unwrap_or_default()
    }
}
