//! Entity models.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! database row plus the status enums stored as `TEXT`.

pub mod customer;
pub mod log_export;
pub mod log_job;
pub mod task;
pub mod zone;

pub use customer::Customer;
pub use log_export::{ExportDestConfig, ExportStatus, LogExport};
pub use log_job::{JobStatus, LogJob, NewLogJob};
pub use task::{Task, TaskStatus};
pub use zone::{Plan, Zone};
