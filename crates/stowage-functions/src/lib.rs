pub mod system;
pub mod targets;
pub mod types;

pub use system::{MULTICAST_CONTENT_TYPE_CLOUD_EVENT, MulticastTarget, StorageCloudFunctions};
pub use targets::emulator::FunctionsEmulatorClient;
pub use types::{CloudEvent, LegacyEvent, StorageAction};
