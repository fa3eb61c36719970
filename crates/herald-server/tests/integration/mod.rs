pub mod common;
pub mod fixture;

mod api_tests;
