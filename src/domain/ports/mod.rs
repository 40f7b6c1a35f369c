//! Narrow traits for every pluggable role.

mod coder_port;
mod disk_cache_port;
mod image_cache_port;
mod image_loader_port;
mod memory_cache_port;
mod operation_port;
mod pipeline_port;

pub use coder_port::{
    AnimatedImageCoder, AnimatedImageProvider, CoderOptions, ImageCoder, IncrementalDecoder,
    ProgressiveImageCoder,
};
pub use disk_cache_port::{DiskCachePort, ExpirationReport};
pub use image_cache_port::ImageCachePort;
pub use image_loader_port::{
    ImageLoaderPort, LoaderEvent, LoaderEvents, LoaderOutput, LoaderSink,
};
pub use memory_cache_port::MemoryCachePort;
pub use operation_port::{Cancellable, CompletedOperation};
pub use pipeline_port::{
    CacheKeyFilter, CacheSerializer, ImageTransformer, ManagerDelegate, OptionsProcessor,
    RequestModifier,
};
