pub mod updater;

pub use updater::{HistoryUpdater, UpdateOutcome};
