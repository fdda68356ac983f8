pub mod attempt_repository;
pub mod cache_repository;
pub mod job_repository;
pub mod memory;
pub mod settings_repository;

pub use attempt_repository::{AttemptFilter, AttemptStore, PgAttemptStore};
pub use cache_repository::{KeyValueCache, PgKeyValueCache};
pub use job_repository::{JobScheduler, PgJobScheduler};
pub use settings_repository::{ExamSettingsStore, PgExamSettingsStore};
