//! Open-time image detection and lazy materialisation

use tracing::{debug, warn};

use crate::cache::{CacheClient, CacheStore, SpaceAllocator};
use crate::error::{CacheError, Result};
use crate::superblock::{ImageMessage, SuperblockExtensionBridge};

use super::ImageBlock;

/// Where a cache stands with respect to an image found at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// No image message was found (or it has been deleted)
    NoImage,
    /// A message was found; its block has not been read yet
    ImagePending,
    /// The block's records have been turned into prefetched entries
    ImageConsuming,
    /// Read-only terminal state: the image was used and left in place
    ImageConsumed,
}

/// Per-cache image loading state
#[derive(Debug, Clone)]
pub struct ImageLoader {
    state: ImageState,
    message: Option<ImageMessage>,
    load_image: bool,
    delete_image: bool,
    poisoned: Option<String>,
}

impl ImageLoader {
    /// Loader for a cache with no image
    pub fn none() -> Self {
        Self {
            state: ImageState::NoImage,
            message: None,
            load_image: false,
            delete_image: false,
            poisoned: None,
        }
    }

    /// Inspect the superblock extension right after an open
    ///
    /// Nothing is read from the block itself until the first metadata
    /// access.
    pub fn on_open<B>(bridge: &B, read_only: bool) -> Self
    where
        B: SuperblockExtensionBridge + ?Sized,
    {
        match bridge.get_image_message() {
            Some(message) => {
                debug!(
                    addr = message.addr,
                    len = message.len,
                    read_only,
                    "found cache image message"
                );
                Self {
                    state: ImageState::ImagePending,
                    message: Some(message),
                    load_image: true,
                    delete_image: !read_only,
                    poisoned: None,
                }
            }
            None => Self::none(),
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// The message found at open, if any
    pub fn message(&self) -> Option<ImageMessage> {
        self.message
    }

    /// True when the open found an image to load
    pub fn load_image(&self) -> bool {
        self.load_image
    }

    /// True when the image will be deleted at close
    pub fn delete_image(&self) -> bool {
        self.delete_image
    }

    /// True once the image was found corrupt
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Close-time handling of the image found at open
    ///
    /// With `delete_image` the message is removed from the superblock
    /// extension and the retired message is returned. Its block stays
    /// allocated until the caller has persisted a superblock that no longer
    /// names it (see [`release_retired_image`]). Otherwise (read-only) the
    /// image is left untouched.
    pub fn finish<H>(&mut self, host: &mut H) -> Result<Option<ImageMessage>>
    where
        H: SuperblockExtensionBridge + ?Sized,
    {
        if !self.load_image {
            return Ok(None);
        }

        if !self.delete_image {
            self.state = ImageState::ImageConsumed;
            return Ok(None);
        }

        let retired = self.message.take();
        if let Some(message) = retired {
            host.delete_image_message()?;
            debug!(addr = message.addr, len = message.len, "unlinked cache image");
        }
        self.state = ImageState::NoImage;
        self.load_image = false;
        self.delete_image = false;
        Ok(retired)
    }
}

/// Return a retired image block's space to the allocator
///
/// Only call this once the superblock on disk no longer refers to the
/// block; until then the old image must stay intact.
pub fn release_retired_image<A>(host: &mut A, retired: ImageMessage) -> Result<()>
where
    A: SpaceAllocator + ?Sized,
{
    if !retired.has_block() {
        return Ok(());
    }
    host.free(retired.addr, retired.len)?;
    debug!(addr = retired.addr, len = retired.len, "released cache image block");
    Ok(())
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::none()
    }
}

impl<P> CacheStore<P> {
    /// Close-time handling of the image found at open; see
    /// [`ImageLoader::finish`]
    pub fn finish_image<H>(&mut self, host: &mut H) -> Result<Option<ImageMessage>>
    where
        H: SuperblockExtensionBridge + ?Sized,
    {
        self.image.finish(host)
    }

    /// Turn a pending image into prefetched entries
    ///
    /// Runs once, on the first `find_or_load`/`protect` after open. A
    /// corrupt block fails this call and every later one.
    pub(crate) fn resolve_pending_image<C>(&mut self, client: &mut C) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        if let Some(reason) = &self.image.poisoned {
            return Err(CacheError::CorruptImage(reason.clone()));
        }
        if self.image.state != ImageState::ImagePending {
            return Ok(());
        }

        let message = match self.image.message {
            Some(message) => message,
            None => {
                self.image.state = ImageState::NoImage;
                return Ok(());
            }
        };
        self.image.state = ImageState::ImageConsuming;

        if !message.has_block() {
            debug!("cache image message carries no block");
            return Ok(());
        }

        let block = match read_block(client, message) {
            Ok(block) => block,
            Err(e) => {
                warn!(addr = message.addr, error = %e, "cache image is unusable");
                self.image.poisoned = Some(e.to_string());
                return Err(e);
            }
        };

        let total = block.len();
        let mut installed = 0usize;
        for (record, bytes) in block.records() {
            if self.install_prefetched(record.addr, record.kind, bytes.to_vec()) {
                installed += 1;
            }
        }
        debug!(total, installed, "materialised cache image");
        Ok(())
    }
}

fn read_block<C: CacheClient>(client: &mut C, message: ImageMessage) -> Result<ImageBlock> {
    let len = usize::try_from(message.len)
        .map_err(|_| CacheError::CorruptImage(format!("block length {} too large", message.len)))?;
    let raw = client.read_block(message.addr, len).map_err(|e| {
        CacheError::CorruptImage(format!(
            "unable to read {len} bytes at {:#x}: {e}",
            message.addr
        ))
    })?;
    if raw.len() != len {
        return Err(CacheError::CorruptImage(format!(
            "block length {} does not match message length {len}",
            raw.len()
        )));
    }
    ImageBlock::decode(&raw)
}
