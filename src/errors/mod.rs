mod integration_error;
mod store_error;

pub use integration_error::{ErrorKind, IntegrationError};
pub use store_error::StoreError;
