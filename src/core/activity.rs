//! Speaker activity tracking.
//!
//! Advisory state for live UI emphasis: who is currently producing partial
//! speech. It never influences turn boundaries.

use serde::{Deserialize, Serialize};

use crate::domain::{CanonicalEvent, Role};

/// Who is speaking right now, if anyone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerActivity {
    current: Option<Role>,
}

impl SpeakerActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Role> {
        self.current
    }

    /// Fold one canonical event into the tracked speaker
    pub fn observe(&mut self, event: &CanonicalEvent) {
        match event {
            CanonicalEvent::SpeechStarted { role } => self.current = Some(*role),
            CanonicalEvent::SpeechEnded { role } => self.clear_if(*role),
            CanonicalEvent::TranscriptFragment(fragment) if fragment.is_final => {
                self.clear_if(fragment.role)
            }
            CanonicalEvent::TranscriptFragment(fragment) => self.current = Some(fragment.role),
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    // Only the tracked role can clear itself
    fn clear_if(&mut self, role: Role) {
        if self.current == Some(role) {
            self.current = None;
        }
    }
}
