//! Cache tier selection.

use serde::{Deserialize, Serialize};

/// Which cache tiers an operation touches, or which tier answered a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// No cache tier (network result, or nothing stored).
    None,
    /// The disk tier.
    Disk,
    /// The memory tier.
    Memory,
    /// Both tiers.
    #[default]
    All,
}

impl CacheType {
    /// True for `Memory` and `All`.
    #[must_use]
    pub const fn includes_memory(self) -> bool {
        matches!(self, Self::Memory | Self::All)
    }

    /// True for `Disk` and `All`.
    #[must_use]
    pub const fn includes_disk(self) -> bool {
        matches!(self, Self::Disk | Self::All)
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Disk => write!(f, "disk"),
            Self::Memory => write!(f, "memory"),
            Self::All => write!(f, "all"),
        }
    }
}
