pub mod common;

mod content_tests;
mod event_tests;
mod job_tests;
mod orchestrator_tests;
mod source_tests;
