//! Close-time image construction

use tracing::{debug, warn};

use crate::cache::{Addr, CacheClient, CacheStore, EntryInfo, SpaceAllocator};
use crate::config::{CacheImageConfig, ImageFlags};
use crate::error::{CacheError, Result};
use crate::superblock::{ImageMessage, SuperblockExtensionBridge};

use super::ImageBlock;

/// Decides whether a resident entry goes into the image
pub type InclusionPredicate = Box<dyn Fn(&EntryInfo) -> bool>;

/// Everything a build needs from the file: entry callbacks, space and the
/// superblock extension
pub trait ImageHost: CacheClient + SpaceAllocator + SuperblockExtensionBridge {}

impl<T> ImageHost for T where T: CacheClient + SpaceAllocator + SuperblockExtensionBridge {}

/// Serializes the resident cache into one block at close
pub struct ImageBuilder {
    config: CacheImageConfig,
    predicate: Option<InclusionPredicate>,
}

impl ImageBuilder {
    pub fn new(config: &CacheImageConfig) -> Self {
        Self {
            config: config.clone(),
            predicate: None,
        }
    }

    /// Further restrict eligibility beyond `inclusion_flags`
    pub fn with_predicate(mut self, predicate: impl Fn(&EntryInfo) -> bool + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Only decoded entries of an included kind that pass the predicate
    pub fn is_eligible(&self, info: &EntryInfo) -> bool {
        !info.prefetched
            && self.config.inclusion_flags.contains(info.kind)
            && self.predicate.as_ref().map_or(true, |p| p(info))
    }

    /// Build, write and register the image
    ///
    /// Returns the registered message, or `None` when no image was
    /// produced (generation disabled, nothing eligible, or too large).
    pub fn build<H: ImageHost>(
        &self,
        cache: &mut CacheStore<H::Payload>,
        host: &mut H,
    ) -> Result<Option<ImageMessage>> {
        if !self.config.generate_image {
            return Ok(None);
        }

        let mut eligible: Vec<Addr> = cache
            .entries()
            .filter(|e| self.is_eligible(&e.info()))
            .map(|e| e.addr())
            .collect();
        if eligible.is_empty() {
            debug!("no image-eligible entries; skipping cache image");
            return Ok(None);
        }
        eligible.sort_unstable();

        // pinned entries cannot be displaced while the block is assembled
        let mut pinned = Vec::with_capacity(eligible.len());
        for &addr in &eligible {
            if cache.entry(addr).is_some_and(|e| !e.is_pinned()) {
                cache.pin(addr)?;
                pinned.push(addr);
            }
        }

        let result = self.write_image(cache, host, &eligible);

        for addr in pinned {
            if let Err(e) = cache.unpin(addr) {
                warn!(addr, error = %e, "failed to unpin image entry");
            }
        }
        result
    }

    fn write_image<H: ImageHost>(
        &self,
        cache: &mut CacheStore<H::Payload>,
        host: &mut H,
        eligible: &[Addr],
    ) -> Result<Option<ImageMessage>> {
        // up-to-date bytes on disk for every dirty eligible entry
        for &addr in eligible {
            cache.evict(host, addr, false)?;
        }

        if !self.config.flags.contains(ImageFlags::GENERATE_BLOCK) {
            let message = ImageMessage::empty();
            host.set_image_message(message)?;
            debug!(entries = eligible.len(), "registered image message without block");
            return Ok(Some(message));
        }

        let mut block = ImageBlock::new();
        for &addr in eligible {
            let entry = match cache.entry(addr) {
                Some(entry) => entry,
                None => continue,
            };
            let payload = match entry.payload() {
                Some(payload) => payload,
                None => continue,
            };
            let bytes = host.serialize(entry.kind(), addr, payload)?;
            block.push(addr, entry.kind(), &bytes)?;
        }

        let nbytes = block.encoded_len();
        if let Some(max) = self.config.max_image_size {
            if nbytes > max {
                warn!(nbytes, max, "cache image exceeds max_image_size; skipping");
                return Ok(None);
            }
        }

        let addr = host.allocate(nbytes as u64).map_err(|e| match e {
            CacheError::AllocationFailure(_) => e,
            other => CacheError::AllocationFailure(other.to_string()),
        })?;

        let raw = block.encode();
        if let Err(e) = host.write_block(addr, &raw) {
            release_block(host, addr, nbytes as u64);
            return Err(CacheError::flush(addr, "cache image block", e));
        }

        let message = ImageMessage::new(addr, nbytes as u64);
        if let Err(e) = host.set_image_message(message) {
            release_block(host, addr, nbytes as u64);
            return Err(e);
        }

        debug!(addr, nbytes, entries = block.len(), "wrote cache image");
        Ok(Some(message))
    }
}

/// Give back a block allocated for an image that was not registered
fn release_block<A: SpaceAllocator + ?Sized>(host: &mut A, addr: Addr, nbytes: u64) {
    if let Err(e) = host.free(addr, nbytes) {
        warn!(addr, nbytes, error = %e, "failed to release cache image block; space leaked");
    }
}
