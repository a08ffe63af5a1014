//! # PlugHost Scheduler
//!
//! Cron-driven scheduled tasks for plugins.
//!
//! ## Architecture
//! ```text
//! TaskSupervisor
//!   ├── TaskRun "reminder/daily"  "0 8 * * *"   → worker (sleep → probe → run)
//!   ├── TaskRun "stats/flush"     "*/5 * * * *" → worker
//!   └── ...
//!         ├── success → consecutive_errors = 0
//!         └── failure → consecutive_errors += 1, > 5 → hard-disabled
//! ```
//!
//! Cron expressions are evaluated in the host's configured timezone; every
//! wait goes through the injected clock so tests can step time.

pub mod cron;
pub mod supervisor;
pub mod tasks;

pub use cron::CronSchedule;
pub use supervisor::{MAX_CONSECUTIVE_ERRORS, TaskSupervisor};
pub use tasks::{AlwaysActive, TaskDescriptor, TaskHandler, TaskKey, TaskOwners, TaskRunStatus};
