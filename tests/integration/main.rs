// Integration test suite, organized into focused modules by feature
// area. Each module shares common::TestClient for database lifecycle
// management.

mod common;

mod auth;
mod hosts;
mod tasks;
mod vault;
mod webhooks;
mod system;
