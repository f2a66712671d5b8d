pub mod app;
pub mod cli;
pub mod constants;
pub mod errors;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

pub use app::App;
pub use errors::{ErrorKind, IntegrationError};
