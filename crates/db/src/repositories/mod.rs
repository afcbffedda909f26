//! Repositories: one struct of associated query fns per table.
//!
//! Callers pass the pool explicitly; no repository holds connections or
//! opens transactions.

pub mod customer_repo;
pub mod log_export_repo;
pub mod log_job_repo;
pub mod task_repo;
pub mod zone_repo;

pub use customer_repo::CustomerRepo;
pub use log_export_repo::LogExportRepo;
pub use log_job_repo::LogJobRepo;
pub use task_repo::{NewTask, TaskRepo};
pub use zone_repo::ZoneRepo;
