//! Application layer with orchestration services and DTOs.

/// Data transfer objects.
pub mod dto;
/// Load orchestration.
pub mod services;

pub use dto::{ImageLoad, ImageResult, LoadEvent};
pub use services::{CombinedOperation, FailedUrls, ImageLoadersManager, ImageManager, ManagerSetupError};
