//! Transcript reconciliation.
//!
//! Folds transcript events into an ordered list of turns. The turn list is
//! the only state and is threaded through by value, so every operation here
//! is a pure transformation.
//!
//! Only the last turn is ever updated in place, and only while it is open
//! and the incoming fragment has the same role. A fragment for the other role
//! opens a new turn even if the last one is still open, so two open turns can
//! coexist (one per role) until each is finalized.

use tracing::trace;

use crate::domain::{CanonicalEvent, Fragment, Turn};

/// Apply one canonical event. Events that carry no transcript content
/// return the turns unchanged.
pub fn apply(event: &CanonicalEvent, turns: Vec<Turn>) -> Vec<Turn> {
    match event {
        CanonicalEvent::TranscriptFragment(fragment) => apply_fragment(fragment, turns),
        CanonicalEvent::TranscriptReplay { fragments } => apply_replay(fragments, turns),
        _ => turns,
    }
}

/// Update the open trailing turn of the same role, or append a new turn.
pub fn apply_fragment(fragment: &Fragment, mut turns: Vec<Turn>) -> Vec<Turn> {
    match turns.last_mut() {
        Some(last) if last.role == fragment.role && last.is_open() => {
            last.text.clone_from(&fragment.text);
            last.is_final = fragment.is_final;
        }
        _ => turns.push(Turn::from_fragment(fragment)),
    }
    turns
}

/// Merge replayed history without duplicating turns already shown.
///
/// A forward cursor starts at the first turn. Each replayed fragment that
/// matches a finalized turn (same role, identical text) at or after the
/// cursor is skipped and the cursor moves past the match; anything else is
/// applied as a normal fragment and the cursor moves to the end.
pub fn apply_replay(fragments: &[Fragment], mut turns: Vec<Turn>) -> Vec<Turn> {
    let mut cursor = 0;

    for fragment in fragments {
        let matched = turns[cursor..].iter().position(|turn| {
            turn.is_final && turn.role == fragment.role && turn.text == fragment.text
        });

        match matched {
            Some(offset) => {
                trace!(role = %fragment.role, "Replayed turn already present");
                cursor += offset + 1;
            }
            None => {
                turns = apply_fragment(fragment, turns);
                cursor = turns.len();
            }
        }
    }

    turns
}

/// Freeze every open turn without touching its text.
pub fn finalize_open(mut turns: Vec<Turn>) -> Vec<Turn> {
    for turn in turns.iter_mut().filter(|t| t.is_open()) {
        turn.is_final = true;
    }
    turns
}

/// Turns for display. Empty finalized turns are dropped here at the
/// presentation boundary when `drop_empty_final` is set, never in the
/// reconciler itself.
pub fn visible_turns(turns: &[Turn], drop_empty_final: bool) -> Vec<&Turn> {
    turns
        .iter()
        .filter(|t| !(drop_empty_final && t.is_final && t.text.trim().is_empty()))
        .collect()
}
