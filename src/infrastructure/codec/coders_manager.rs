//! Ordered coder registry with first-match dispatch.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{GifCoder, StandardCoder};
use crate::domain::entities::{ImageFormat, WebImage};
use crate::domain::errors::CodecError;
use crate::domain::ports::{CoderOptions, ImageCoder, IncrementalDecoder};

type CoderList = Arc<Vec<Arc<dyn ImageCoder>>>;

static SHARED: OnceLock<Arc<CodersManager>> = OnceLock::new();

/// Holds coders in registration order and dispatches to the most recently
/// added coder that accepts the input.
///
/// Dispatch works on a snapshot of the list, so a call already in flight is
/// unaffected by concurrent `add`/`remove`.
pub struct CodersManager {
    coders: RwLock<CoderList>,
}

impl CodersManager {
    /// Creates a manager with no coders.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            coders: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Creates a manager with the default coders.
    #[must_use]
    pub fn with_defaults() -> Self {
        let manager = Self::empty();
        manager.set_coders(vec![
            Arc::new(StandardCoder::new()),
            Arc::new(GifCoder::new()),
        ]);
        manager
    }

    /// Process-wide instance, created with the default coders on first use.
    pub fn shared() -> Arc<Self> {
        SHARED.get_or_init(|| Arc::new(Self::with_defaults())).clone()
    }

    /// Installs the process-wide instance. Fails if it already exists.
    ///
    /// # Errors
    /// Returns the rejected manager if `shared()` was already initialized.
    pub fn install_shared(manager: Arc<Self>) -> Result<(), Arc<Self>> {
        SHARED.set(manager)
    }

    /// Current coder list, lowest priority first.
    #[must_use]
    pub fn coders(&self) -> CoderList {
        self.coders.read().clone()
    }

    /// Appends `coder` with the highest priority.
    pub fn add_coder(&self, coder: Arc<dyn ImageCoder>) {
        let mut guard = self.coders.write();
        let mut list = Vec::clone(&guard);
        debug!(coder = coder.name(), "registering coder");
        list.push(coder);
        *guard = Arc::new(list);
    }

    /// Removes `coder` (compared by identity).
    pub fn remove_coder(&self, coder: &Arc<dyn ImageCoder>) {
        let mut guard = self.coders.write();
        let list: Vec<_> = guard
            .iter()
            .filter(|c| !Arc::ptr_eq(c, coder))
            .cloned()
            .collect();
        *guard = Arc::new(list);
    }

    /// Replaces the whole list.
    pub fn set_coders(&self, coders: Vec<Arc<dyn ImageCoder>>) {
        *self.coders.write() = Arc::new(coders);
    }

    fn decoder_for(&self, data: &[u8]) -> Option<Arc<dyn ImageCoder>> {
        self.coders()
            .iter()
            .rev()
            .find(|c| c.can_decode(data))
            .cloned()
    }

    fn encoder_for(&self, format: ImageFormat) -> Option<Arc<dyn ImageCoder>> {
        self.coders()
            .iter()
            .rev()
            .find(|c| c.can_encode(format))
            .cloned()
    }

    /// Creates a progressive decoder from the first coder that supports
    /// incremental decoding of `data`.
    #[must_use]
    pub fn incremental_decoder_for(
        &self,
        data: &[u8],
        options: &CoderOptions,
    ) -> Option<Box<dyn IncrementalDecoder>> {
        self.coders().iter().rev().find_map(|c| {
            c.as_progressive()
                .filter(|p| p.can_incremental_decode(data))
                .map(|p| p.incremental_decoder(options))
        })
    }
}

impl Default for CodersManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ImageCoder for CodersManager {
    fn name(&self) -> &'static str {
        "manager"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        self.decoder_for(data).is_some()
    }

    fn decode(&self, data: &Bytes, options: &CoderOptions) -> Result<WebImage, CodecError> {
        let coder = self.decoder_for(data).ok_or(CodecError::UnsupportedFormat)?;
        trace!(coder = coder.name(), bytes = data.len(), "decoding");
        coder.decode(data, options)
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        self.encoder_for(format).is_some()
    }

    fn encode(
        &self,
        image: &WebImage,
        format: ImageFormat,
        options: &CoderOptions,
    ) -> Result<Bytes, CodecError> {
        let coder = self.encoder_for(format).ok_or(CodecError::UnsupportedFormat)?;
        trace!(coder = coder.name(), %format, "encoding");
        coder.encode(image, format, options)
    }
}

impl std::fmt::Debug for CodersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.coders().iter().map(|c| c.name()).collect();
        f.debug_struct("CodersManager").field("coders", &names).finish()
    }
}
