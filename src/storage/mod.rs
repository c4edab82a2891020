//! SQLite persistence for horse state, race results and wagers.

pub mod repository;
pub mod schema;

pub use repository::{Repository, StoredResult, StoredWager, WagerResolution};
