pub mod disk;
pub mod traits;

pub use disk::{DiskPersistence, disk_file_name};
pub use traits::Persistence;
