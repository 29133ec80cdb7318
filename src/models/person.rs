//! People API models

use serde::{Deserialize, Serialize};

/// Response of `/2/people/@me/@self`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub entry: Person,
}

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub display_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub profile_url: Option<String>,
}
