//! Transcript turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Fragment, Role};

/// One contiguous utterance by a single speaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Assigned once at creation, never reused
    pub id: Uuid,

    /// Who is speaking
    pub role: Role,

    /// Utterance so far (cumulative)
    pub text: String,

    /// Finalized turns are immutable
    pub is_final: bool,

    /// When the first fragment of this turn arrived
    pub started_at: DateTime<Utc>,
}

impl Turn {
    /// Open a new turn from a fragment, stamped with the current time
    pub fn from_fragment(fragment: &Fragment) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: fragment.role,
            text: fragment.text.clone(),
            is_final: fragment.is_final,
            started_at: Utc::now(),
        }
    }

    /// Open turns may still be updated in place
    pub fn is_open(&self) -> bool {
        !self.is_final
    }
}
