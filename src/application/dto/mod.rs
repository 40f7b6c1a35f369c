//! Data transfer objects for the application layer.

mod load_event;

pub use load_event::{ImageLoad, ImageResult, LoadEvent};
