mod common;

mod concurrency_tests;
mod drift_tests;
mod persistence_tests;
