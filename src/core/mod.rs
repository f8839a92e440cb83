pub mod error;
pub mod types;

pub use error::{CrudError, Result, RetryableError};
pub use types::IsolationLevel;
