pub mod config;
pub mod content_repository;
pub mod database;
pub mod event_repository;
pub mod job_repository;
pub mod source_repository;

pub use config::DatabaseConfig;
pub use content_repository::ContentRepository;
pub use database::Database;
pub use event_repository::{EventRepository, StoredEvent};
pub use job_repository::JobRepository;
pub use source_repository::SourceRepository;
