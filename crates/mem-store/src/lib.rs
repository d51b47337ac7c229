pub mod database;
pub mod error;
pub mod queue;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod summary_queue;
pub mod truncate;

pub use database::Database;
pub use error::StoreError;
pub use queue::{EventStatus, QueueStats, RawToolEvent, ToolEventQueue, MAX_RETRIES};
pub use sessions::SessionStore;
pub use summary_queue::{RawSummaryRequest, SummaryRequestQueue};
