pub mod kill;
pub mod reaper;
pub mod tracker;

pub use reaper::{OrphanReaper, ReaperConfig, ScanReport};
pub use tracker::{ProcessTracker, TerminateSummary, TrackedProcess};
