use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::profile::{CandidateProfile, ImagePayload};

/// A saved snapshot of a profile, as listed in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub form_data: CandidateProfile,
    #[serde(default)]
    pub photo_preview: Option<ImagePayload>,
}

impl HistoryEntry {
    pub fn new(form_data: CandidateProfile, photo_preview: Option<ImagePayload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            form_data,
            photo_preview,
        }
    }
}
