//! Port definition for the memory tier.

use crate::domain::entities::WebImage;

/// Synchronous, bounded store of decoded images.
/// Implementations must tolerate arbitrary concurrent callers.
pub trait MemoryCachePort: Send + Sync {
    /// Returns the image for `key`, marking it recently used.
    fn get(&self, key: &str) -> Option<WebImage>;

    /// Stores `image` with its default cost.
    fn set(&self, key: &str, image: WebImage) {
        let cost = image.memory_cost();
        self.set_with_cost(key, image, cost);
    }

    /// Stores `image` with an explicit cost.
    fn set_with_cost(&self, key: &str, image: WebImage, cost: u64);

    /// Removes `key`. Removing a missing key is a no-op.
    fn remove(&self, key: &str);

    /// Drops every resident entry in response to memory pressure.
    fn purge(&self);

    /// Drops every entry, including non-owning references.
    fn clear(&self);

    /// Number of resident entries.
    fn len(&self) -> usize;

    /// Returns true if nothing is resident.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the costs of resident entries.
    fn total_cost(&self) -> u64;
}
