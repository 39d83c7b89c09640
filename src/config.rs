//! Configuration for metacache
//!
//! Centralized configuration with sensible defaults.

use crate::cache::KindSet;
use crate::error::{CacheError, Result};

/// Bucket count used when no (or a zero) size hint is given
pub const DEFAULT_CACHE_SLOTS: usize = 10330;

/// The only cache image configuration version understood
pub const CACHE_IMAGE_CONFIG_VERSION: u32 = 1;

/// Main configuration for an open file
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Number of direct-mapped buckets
    pub cache_slots: usize,

    /// Write entries in ascending address order on whole-cache flushes
    pub sort_flush_by_addr: bool,

    // -------------------------------------------------------------------------
    // File Space Configuration
    // -------------------------------------------------------------------------
    /// Allocations that would grow the file past this many bytes fail
    pub max_file_size: Option<u64>,

    // -------------------------------------------------------------------------
    // Cache Image Configuration
    // -------------------------------------------------------------------------
    pub image: CacheImageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_slots: DEFAULT_CACHE_SLOTS,
            sort_flush_by_addr: true,
            max_file_size: None,
            image: CacheImageConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration before a file is opened with it
    pub fn validate(&self) -> Result<()> {
        self.image.validate()
    }

    /// Bucket count actually used
    pub fn effective_slots(&self) -> usize {
        if self.cache_slots < 1 {
            DEFAULT_CACHE_SLOTS
        } else {
            self.cache_slots
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the number of cache buckets
    pub fn cache_slots(mut self, slots: usize) -> Self {
        self.config.cache_slots = slots;
        self
    }

    /// Enable or disable address-ordered flushing
    pub fn sort_flush_by_addr(mut self, sorted: bool) -> Self {
        self.config.sort_flush_by_addr = sorted;
        self
    }

    /// Cap the file size (in bytes)
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = Some(bytes);
        self
    }

    /// Replace the whole cache image configuration
    pub fn image(mut self, image: CacheImageConfig) -> Self {
        self.config.image = image;
        self
    }

    /// Request a cache image at close
    pub fn generate_image(mut self, enabled: bool) -> Self {
        self.config.image.generate_image = enabled;
        self
    }

    /// Skip the image when it would exceed `bytes`
    pub fn max_image_size(mut self, bytes: usize) -> Self {
        self.config.image.max_image_size = Some(bytes);
        self
    }

    /// Kinds eligible for the image
    pub fn inclusion_flags(mut self, kinds: KindSet) -> Self {
        self.config.image.inclusion_flags = kinds;
        self
    }

    pub fn image_flags(mut self, flags: ImageFlags) -> Self {
        self.config.image.flags = flags;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Cache Image Configuration
// =============================================================================

/// What an image build writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFlags(u8);

impl ImageFlags {
    /// Register the superblock extension message
    pub const GENERATE_MESSAGE: ImageFlags = ImageFlags(0x1);

    /// Write the image block itself
    pub const GENERATE_BLOCK: ImageFlags = ImageFlags(0x2);

    pub const ALL: ImageFlags = ImageFlags(0x3);

    pub const fn empty() -> Self {
        ImageFlags(0)
    }

    pub fn contains(self, other: ImageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Parse raw bits; unknown bits are rejected
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(ImageFlags(bits))
        } else {
            None
        }
    }
}

impl Default for ImageFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitOr for ImageFlags {
    type Output = ImageFlags;

    fn bitor(self, rhs: ImageFlags) -> ImageFlags {
        ImageFlags(self.0 | rhs.0)
    }
}

/// Caller-visible cache image settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheImageConfig {
    /// Must equal `CACHE_IMAGE_CONFIG_VERSION`
    pub version: u32,

    /// Write an image when the file closes
    pub generate_image: bool,

    /// Upper bound on the encoded block, `None` for unlimited
    pub max_image_size: Option<usize>,

    /// Kinds eligible for the image
    pub inclusion_flags: KindSet,

    pub flags: ImageFlags,
}

impl Default for CacheImageConfig {
    fn default() -> Self {
        Self {
            version: CACHE_IMAGE_CONFIG_VERSION,
            generate_image: false,
            max_image_size: None,
            inclusion_flags: KindSet::all(),
            flags: ImageFlags::ALL,
        }
    }
}

impl CacheImageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != CACHE_IMAGE_CONFIG_VERSION {
            return Err(CacheError::Config(format!(
                "unknown cache image config version {}",
                self.version
            )));
        }
        if self.generate_image && !self.flags.contains(ImageFlags::GENERATE_MESSAGE) {
            return Err(CacheError::Config(
                "image generation requires GENERATE_MESSAGE".into(),
            ));
        }
        if self.max_image_size == Some(0) {
            return Err(CacheError::Config("max_image_size must be positive".into()));
        }
        Ok(())
    }
}
