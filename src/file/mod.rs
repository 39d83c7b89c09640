//! File Module
//!
//! An open container file: superblock, file space, and the metadata cache
//! that holds its groups, dataset headers and attribute indices.
//!
//! ## Responsibilities
//! - Create and open files, detecting a cache image left by the last close
//! - Path-based group / dataset / attribute operations through the cache
//! - Run the close protocol exactly once
//!
//! ## Close Protocol
//! ```text
//!   close()
//!     │
//!     ├─1─▶ ImageLoader::finish    unlink the image found at open (rw only)
//!     ├─2─▶ ImageBuilder::build    write a new image (if requested, rw only)
//!     ├─3─▶ CacheStore::teardown   write back and drop every entry
//!     ├─4─▶ Superblock::write_to   persist eoa + extension, sync
//!     └─5─▶ release_retired_image  free the old block, rewrite if eoa shrank
//! ```
//!
//! The old image block stays allocated until step 4 has persisted a
//! superblock that no longer names it, so the new block never lands on top
//! of it and a failed close leaves the previous image readable.

mod context;

pub use context::{FileContext, IoCounters};

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cache::{
    Addr, AddrFilter, BlockIo, CacheStats, CacheStore, EntryInfo, EntryKind, Protected,
    SpaceAllocator, UNDEF_ADDR,
};
use crate::config::{CacheImageConfig, Config};
use crate::error::{CacheError, Result};
use crate::image::{
    release_retired_image, ImageBuilder, ImageLoader, ImageState, InclusionPredicate,
};
use crate::io::{FileDriver, FreeSpace, FsDriver};
use crate::objects::{
    AttributeIndex, DatasetLayout, GroupNode, HeaderBody, MetadataObject, ObjectHeader,
};
use crate::superblock::{ImageMessage, Superblock, SuperblockExtensionBridge, SUPERBLOCK_SIZE};

/// How an existing file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Shape and contents of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}

/// An open container file
pub struct MetadataFile {
    ctx: FileContext,
    cache: CacheStore<MetadataObject>,
    config: Config,
    predicate: Option<InclusionPredicate>,
    closed: bool,
}

impl MetadataFile {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an empty file (with a root group) on `driver`
    pub fn create(driver: Box<dyn FileDriver>, config: Config) -> Result<Self> {
        config.validate()?;
        if driver.is_read_only() {
            return Err(CacheError::ReadOnly);
        }

        let space = FreeSpace::new(SUPERBLOCK_SIZE, SUPERBLOCK_SIZE).with_limit(config.max_file_size);
        let ctx = FileContext::new(driver, Superblock::new(), space);
        let mut file = Self::assemble(ctx, config);

        let table = file.insert_object(MetadataObject::Group(GroupNode::default()))?;
        let root = file.insert_object(MetadataObject::Header(ObjectHeader::group(table)))?;
        file.ctx.superblock.root_group = root;
        file.ctx.write_superblock()?;

        info!(root, "created container file");
        Ok(file)
    }

    /// Open an existing file
    ///
    /// A cache image recorded in the superblock is noted but not read until
    /// the first metadata access. On a read-only driver `generate_image` is
    /// ignored.
    pub fn open(mut driver: Box<dyn FileDriver>, mut config: Config) -> Result<Self> {
        config.validate()?;
        let read_only = driver.is_read_only();
        if read_only && config.image.generate_image {
            debug!("ignoring generate_image on read-only open");
            config.image.generate_image = false;
        }

        let superblock = Superblock::read_from(driver.as_mut())?;
        let space = FreeSpace::new(SUPERBLOCK_SIZE, superblock.eoa).with_limit(config.max_file_size);
        let ctx = FileContext::new(driver, superblock, space);

        let mut file = Self::assemble(ctx, config);
        let loader = ImageLoader::on_open(&file.ctx, read_only);
        file.cache.attach_image(loader);

        info!(
            read_only,
            eoa = file.ctx.superblock.eoa,
            image = file.cache.image().load_image(),
            "opened container file"
        );
        Ok(file)
    }

    /// Create a file at `path`, truncating any existing one
    pub fn create_path(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::create(Box::new(FsDriver::create(path)?), config)
    }

    pub fn open_path(path: impl AsRef<Path>, mode: OpenMode, config: Config) -> Result<Self> {
        let driver = FsDriver::open(path, mode == OpenMode::ReadOnly)?;
        Self::open(Box::new(driver), config)
    }

    fn assemble(ctx: FileContext, config: Config) -> Self {
        let cache = CacheStore::new(config.effective_slots()).with_sorted_flush(config.sort_flush_by_addr);
        Self {
            ctx,
            cache,
            config,
            predicate: None,
            closed: false,
        }
    }

    /// Restrict which entries the close-time image may contain
    pub fn set_image_predicate(&mut self, predicate: impl Fn(&EntryInfo) -> bool + 'static) {
        self.predicate = Some(Box::new(predicate));
    }

    /// Write back every dirty object and the superblock
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush(&mut self.ctx, None, AddrFilter::All, false)?;
        if !self.ctx.is_read_only() {
            self.ctx.write_superblock()?;
            self.ctx.sync()?;
        }
        Ok(())
    }

    /// Run the close protocol
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let read_only = self.ctx.is_read_only();

        let retired = self.cache.finish_image(&mut self.ctx)?;

        if !read_only && self.config.image.generate_image {
            let mut builder = ImageBuilder::new(&self.config.image);
            if let Some(predicate) = self.predicate.take() {
                builder = builder.with_predicate(predicate);
            }
            builder.build(&mut self.cache, &mut self.ctx)?;
        }

        self.cache.teardown(&mut self.ctx)?;

        if !read_only {
            self.ctx.write_superblock()?;
            self.ctx.sync()?;
        }

        if let Some(retired) = retired {
            let eoa = self.ctx.space.eoa();
            release_retired_image(&mut self.ctx, retired)?;
            if self.ctx.space.eoa() != eoa {
                self.ctx.write_superblock()?;
                self.ctx.sync()?;
            }
        }

        info!(
            read_only,
            image = ?self.ctx.superblock.get_image_message(),
            "closed container file"
        );
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_read_only(&self) -> bool {
        self.ctx.is_read_only()
    }

    /// Image settings in effect for this open
    pub fn image_config(&self) -> &CacheImageConfig {
        &self.config.image
    }

    pub fn image_state(&self) -> ImageState {
        self.cache.image().state()
    }

    /// True when the open found a cache image
    pub fn load_image(&self) -> bool {
        self.cache.image().load_image()
    }

    /// True when the image found at open will be deleted at close
    pub fn delete_image(&self) -> bool {
        self.cache.image().delete_image()
    }

    /// Image message currently held by the in-memory superblock
    pub fn image_message(&self) -> Option<ImageMessage> {
        self.ctx.get_image_message()
    }

    pub fn superblock(&self) -> &Superblock {
        &self.ctx.superblock
    }

    pub fn cache(&self) -> &CacheStore<MetadataObject> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn io_counters(&self) -> IoCounters {
        self.ctx.counters
    }

    // =========================================================================
    // Hierarchy Operations
    // =========================================================================

    /// Create an empty group at `path`; the parent must exist
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = self.prepare_link(path)?;

        let table = self.insert_object(MetadataObject::Group(GroupNode::default()))?;
        let header = self.insert_object(MetadataObject::Header(ObjectHeader::group(table)))?;
        self.link(parent, name, header)?;

        debug!(path, header, "created group");
        Ok(())
    }

    /// Create a dataset at `path` holding `data`
    pub fn create_dataset(&mut self, path: &str, shape: &[u64], data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = self.prepare_link(path)?;

        let (data_addr, data_len) = if data.is_empty() {
            (UNDEF_ADDR, 0)
        } else {
            let addr = self.ctx.allocate(data.len() as u64)?;
            self.ctx.write_block(addr, data)?;
            (addr, data.len() as u64)
        };

        let layout = DatasetLayout {
            shape: shape.to_vec(),
            data_addr,
            data_len,
        };
        let header = self.insert_object(MetadataObject::Header(ObjectHeader::dataset(layout)))?;
        self.link(parent, name, header)?;

        debug!(path, header, bytes = data_len, "created dataset");
        Ok(())
    }

    /// Read a dataset's shape and bytes
    pub fn read_dataset(&mut self, path: &str) -> Result<Dataset> {
        let header = self.resolve(path)?;
        let layout = self.dataset_layout(header, path)?;

        let data = if layout.data_len == 0 {
            Vec::new()
        } else {
            self.ctx.read_block(layout.data_addr, layout.data_len as usize)?
        };
        Ok(Dataset {
            shape: layout.shape,
            data,
        })
    }

    /// Overwrite a dataset's bytes; the length must not change
    pub fn write_dataset(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let header = self.resolve(path)?;
        let layout = self.dataset_layout(header, path)?;

        if data.len() as u64 != layout.data_len {
            return Err(CacheError::Format(format!(
                "{path} holds {} bytes, got {}",
                layout.data_len,
                data.len()
            )));
        }
        if !data.is_empty() {
            self.ctx.write_block(layout.data_addr, data)?;
        }
        Ok(())
    }

    /// Set (or replace) an attribute on the object at `path`
    pub fn set_attribute(&mut self, path: &str, name: &str, value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let header = self.resolve(path)?;
        let index = self.attribute_index_addr(header)?;

        if index == UNDEF_ADDR {
            let mut attrs = AttributeIndex::default();
            attrs.attrs.insert(name.to_string(), value.to_vec());
            let index = self.insert_object(MetadataObject::Attributes(attrs))?;
            return self.set_attribute_index(header, index);
        }

        let mut handle = self.cache.protect(&mut self.ctx, EntryKind::AttributeIndex, index, &())?;
        let updated = match handle.as_attributes_mut() {
            Some(attrs) => {
                attrs.attrs.insert(name.to_string(), value.to_vec());
                true
            }
            None => false,
        };
        if !updated {
            self.cache.unprotect(&mut self.ctx, handle, false)?;
            return Err(CacheError::Format(format!("{index:#x} is not an attribute index")));
        }

        let moved = self.commit(handle)?;
        if moved != index {
            self.set_attribute_index(header, moved)?;
        }
        Ok(())
    }

    /// Value of attribute `name` on the object at `path`
    pub fn attribute(&mut self, path: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let header = self.resolve(path)?;
        let index = self.attribute_index_addr(header)?;
        if index == UNDEF_ADDR {
            return Ok(None);
        }

        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::AttributeIndex, index, &())?;
        let attrs = object
            .as_attributes()
            .ok_or_else(|| CacheError::Format(format!("{index:#x} is not an attribute index")))?;
        Ok(attrs.attrs.get(name).cloned())
    }

    /// Names linked in the group at `path`, sorted
    pub fn list(&mut self, path: &str) -> Result<Vec<String>> {
        let header = self.resolve(path)?;
        let table = self.group_table(header, path)?;
        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::SymbolTableNode, table, &())?;
        let group = object
            .as_group()
            .ok_or_else(|| CacheError::Format(format!("{table:#x} is not a group node")))?;
        Ok(group.links.keys().cloned().collect())
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        match self.resolve(path) {
            Ok(_) => Ok(true),
            Err(CacheError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn ensure_writable(&self) -> Result<()> {
        if self.ctx.is_read_only() {
            Err(CacheError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Allocate space for a new object and hand it to the cache (dirty)
    fn insert_object(&mut self, object: MetadataObject) -> Result<Addr> {
        let kind = object.kind();
        let frame_len = self.ctx.frame_len(&object)?;
        let (addr, _) = self.ctx.allocate_object(frame_len)?;
        self.cache.insert(&mut self.ctx, kind, addr, object)?;
        Ok(addr)
    }

    /// Return a modified object to the cache, moving it to a larger
    /// allocation when it no longer fits. Returns its (possibly new) address.
    fn commit(&mut self, handle: Protected<MetadataObject>) -> Result<Addr> {
        let addr = handle.addr();
        let kind = handle.kind();
        let needed = self.ctx.frame_len(handle.payload())?;
        let capacity = self.ctx.capacity(addr)?;

        if needed <= capacity as usize {
            self.cache.unprotect(&mut self.ctx, handle, true)?;
            return Ok(addr);
        }

        let grown = needed.max(capacity as usize * 2);
        let (new_addr, _) = self.ctx.allocate_object(grown)?;
        self.cache.unprotect(&mut self.ctx, handle, true)?;
        self.cache.rename(&mut self.ctx, kind, addr, new_addr)?;
        self.ctx.release_object(addr)?;

        debug!(old = addr, new = new_addr, %kind, bytes = needed, "relocated object");
        Ok(new_addr)
    }

    /// Split `path` into components; the root is the empty list
    fn components(path: &str) -> Result<Vec<&str>> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CacheError::NotFound(format!("invalid path {path:?}")));
        }
        Ok(parts)
    }

    /// Object header address for `path`
    fn resolve(&mut self, path: &str) -> Result<Addr> {
        let mut header = self.ctx.superblock.root_group;
        if header == UNDEF_ADDR {
            return Err(CacheError::Format("file has no root group".into()));
        }

        for name in Self::components(path)? {
            let table = self.group_table(header, path)?;
            header = self
                .lookup(table, name)?
                .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
        }
        Ok(header)
    }

    /// Resolve the parent of `path` and check the last component is free
    fn prepare_link<'p>(&mut self, path: &'p str) -> Result<(Addr, &'p str)> {
        let mut parts = Self::components(path)?;
        let name = parts
            .pop()
            .ok_or_else(|| CacheError::AlreadyExists("/".into()))?;

        let parent_path = parts.join("/");
        let parent = self.resolve(&parent_path)?;
        let table = self.group_table(parent, &parent_path)?;
        if self.lookup(table, name)?.is_some() {
            return Err(CacheError::AlreadyExists(path.to_string()));
        }
        Ok((parent, name))
    }

    fn group_table(&mut self, header: Addr, path: &str) -> Result<Addr> {
        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::ObjectHeader, header, &())?;
        match object.as_header().map(|h| &h.body) {
            Some(HeaderBody::Group { table }) => Ok(*table),
            _ => Err(CacheError::Format(format!("{path:?} is not a group"))),
        }
    }

    fn lookup(&mut self, table: Addr, name: &str) -> Result<Option<Addr>> {
        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::SymbolTableNode, table, &())?;
        let group = object
            .as_group()
            .ok_or_else(|| CacheError::Format(format!("{table:#x} is not a group node")))?;
        Ok(group.links.get(name).copied())
    }

    fn dataset_layout(&mut self, header: Addr, path: &str) -> Result<DatasetLayout> {
        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::ObjectHeader, header, &())?;
        match object.as_header().map(|h| &h.body) {
            Some(HeaderBody::Dataset(layout)) => Ok(layout.clone()),
            _ => Err(CacheError::Format(format!("{path:?} is not a dataset"))),
        }
    }

    fn attribute_index_addr(&mut self, header: Addr) -> Result<Addr> {
        let object = self.cache.find_or_load(&mut self.ctx, EntryKind::ObjectHeader, header, &())?;
        object
            .as_header()
            .map(|h| h.attributes)
            .ok_or_else(|| CacheError::Format(format!("{header:#x} is not an object header")))
    }

    /// Point the header at `header` to a new attribute index
    fn set_attribute_index(&mut self, header: Addr, index: Addr) -> Result<()> {
        let mut handle = self.cache.protect(&mut self.ctx, EntryKind::ObjectHeader, header, &())?;
        if let Some(h) = handle.as_header_mut() {
            h.attributes = index;
        }
        self.cache.unprotect(&mut self.ctx, handle, true)?;
        Ok(())
    }

    /// Add `name → child` to the group whose header is at `parent`
    fn link(&mut self, parent: Addr, name: &str, child: Addr) -> Result<()> {
        let table = self.group_table(parent, name)?;
        let mut handle = self.cache.protect(&mut self.ctx, EntryKind::SymbolTableNode, table, &())?;

        let inserted = match handle.as_group_mut() {
            Some(group) if !group.links.contains_key(name) => {
                group.links.insert(name.to_string(), child);
                true
            }
            _ => false,
        };
        if !inserted {
            self.cache.unprotect(&mut self.ctx, handle, false)?;
            return Err(CacheError::AlreadyExists(name.to_string()));
        }

        let moved = self.commit(handle)?;
        if moved != table {
            let mut header = self.cache.protect(&mut self.ctx, EntryKind::ObjectHeader, parent, &())?;
            if let Some(h) = header.as_header_mut() {
                h.body = HeaderBody::Group { table: moved };
            }
            self.cache.unprotect(&mut self.ctx, header, true)?;
        }
        Ok(())
    }
}

impl Drop for MetadataFile {
    fn drop(&mut self) {
        if !self.closed && !self.ctx.is_read_only() {
            warn!("container file dropped without close; cached metadata was not written");
        }
    }
}
