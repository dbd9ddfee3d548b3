//! Domain types for the call engine.
//!
//! This module contains the core data structures:
//! - Events: Raw transport payloads and their canonical form
//! - Turn: Transcript entries
//! - Call: Lifecycle states, user commands, transitions

pub mod call;
pub mod events;
pub mod turn;

// Re-export commonly used types
pub use call::{CallState, Transition, UserCommand};
pub use events::{CanonicalEvent, Fragment, RawEvent, Role};
pub use turn::Turn;
