//! Cross-component integration tests for the lifecycle core.

mod admin;
mod concurrency;
mod monitors;
mod partner;
mod scenarios;
