//! Poll/Power loop
//!
//! Keeps now-playing metadata and power state of the selected device fresh.
//! Power changes are applied to the cache before the daemon confirms them
//! and rolled back if it refuses.

pub mod poller;
pub mod power;

pub use poller::{Poller, Snapshot};
pub use power::PowerTracker;
