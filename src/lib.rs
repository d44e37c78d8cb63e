pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;

// Counting mocks and in-memory adapters shared by unit and integration tests.
pub mod test_helpers;

pub use config::ReconcilerConfig;
pub use errors::AppError;
