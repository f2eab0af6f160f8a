//! Durable artifacts for the learning stores
//!
//! Journaled stores append one JSON line per committed change and rebuild
//! their in-memory indexes by replay. Small tables are written whole through
//! an atomic rename.

pub mod journal;
pub mod snapshot;

pub use journal::Journal;
pub use snapshot::{read_json, remove_if_exists, write_json_atomic};
