pub mod error;
pub mod hash;
pub mod time;

pub use error::{Result, StorageError};
