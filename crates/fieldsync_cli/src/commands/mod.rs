//! Command implementations.

pub mod inspect;
pub mod logs;
pub mod prune;
pub mod quarantine;
pub mod status;
