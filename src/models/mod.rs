//! Data models for gymlog entities.
//!
//! This module contains the data structures shared between the session
//! core and its consumers:
//!
//! - `User`, `ProfileUpdate`: the authenticated identity and its edit form
//! - `HistoryDay`, `HistoryEntry`: day-grouped exercise history

pub mod history;
pub mod user;

pub use history::{HistoryDay, HistoryEntry};
pub use user::{ProfileUpdate, User};
