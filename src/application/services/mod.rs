//! Orchestration services.

pub mod combined_operation;
pub mod failed_urls;
pub mod image_manager;
pub mod loaders_manager;

pub use combined_operation::{CombinedOperation, OperationRegistry};
pub use failed_urls::FailedUrls;
pub use image_manager::{ImageManager, ManagerSetupError};
pub use loaders_manager::ImageLoadersManager;
