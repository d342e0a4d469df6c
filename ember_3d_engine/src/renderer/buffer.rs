/// GPU buffer with lazily created read-only and read-write views
///
/// A Buffer owns exactly one native allocation. Views are addressed by their
/// index in the per-kind view list (creation order, index 0 is the default
/// view) and live exactly as long as the buffer.
///
/// Usage-dependent CPU access:
/// - Dynamic + Write: `map()` (write-discard) and `update()` (full rewrite)
/// - Default: `update()` as a driver-managed partial update
/// - Read access: `map_for_read()` after the GPU wrote the data

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};
use bytemuck::Pod;
use crate::error::Result;
use crate::{engine_error, engine_bail};
use crate::graphics_device::{
    GraphicsDevice, BufferHandle, BufferViewHandle, BufferDesc, BufferSubresourceDesc,
    BufferViewDesc, ViewKind, ResourceUsage, CpuAccess, MapMode, Format,
};

/// Index returned when a view could not be created
pub const INVALID_VIEW_INDEX: usize = usize::MAX;

const SOURCE: &str = "ember3d::Buffer";

// ===== BUFFER =====

pub struct Buffer {
    device: Arc<dyn GraphicsDevice>,
    handle: BufferHandle,
    desc: BufferDesc,
    read_only_views: Mutex<Vec<BufferViewHandle>>,
    read_write_views: Mutex<Vec<BufferViewHandle>>,
}

impl Buffer {
    /// Create a buffer, uploading `initial_data` if given
    ///
    /// # Panics
    ///
    /// Panics (after logging the native error) if the device rejects the buffer.
    pub fn new(device: Arc<dyn GraphicsDevice>, desc: BufferDesc, initial_data: Option<&[u8]>) -> Self {
        match Self::try_new(device, desc, initial_data) {
            Ok(buffer) => buffer,
            Err(err) => panic!("Buffer creation failed: {}", err),
        }
    }

    /// Fallible variant of `new`
    pub fn try_new(device: Arc<dyn GraphicsDevice>, desc: BufferDesc, initial_data: Option<&[u8]>) -> Result<Self> {
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                engine_bail!(SOURCE, "Initial data ({} bytes) larger than buffer ({} bytes)", data.len(), desc.size);
            }
        }

        let handle = device.create_buffer(&desc, initial_data).map_err(|err| {
            engine_error!(SOURCE, "Native buffer creation failed: {}", err);
            err
        })?;

        Ok(Self {
            device,
            handle,
            desc,
            read_only_views: Mutex::new(Vec::new()),
            read_write_views: Mutex::new(Vec::new()),
        })
    }

    /// Create a buffer initialized with a slice of plain-old-data elements
    pub fn with_data<T: Pod>(device: Arc<dyn GraphicsDevice>, desc: BufferDesc, data: &[T]) -> Self {
        Self::new(device, desc, Some(bytemuck::cast_slice(data)))
    }

    // ===== ACCESSORS =====

    pub fn desc(&self) -> &BufferDesc { &self.desc }

    /// Size in bytes
    pub fn size(&self) -> u64 { self.desc.size }

    pub fn stride(&self) -> u32 { self.desc.stride }

    pub fn format(&self) -> Format { self.desc.format }

    /// Native buffer handle
    pub fn handle(&self) -> BufferHandle { self.handle }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> { &self.device }

    /// Number of `stride`-sized elements
    ///
    /// # Panics
    ///
    /// Panics if the buffer has no stride.
    pub fn element_count(&self) -> u64 {
        assert!(self.desc.stride != 0, "element_count() on a buffer without stride");
        self.desc.size / self.desc.stride as u64
    }

    // ===== VIEWS =====

    /// Create a read-only (shader resource) view
    ///
    /// # Returns
    ///
    /// The index of the view in the read-only list, or `INVALID_VIEW_INDEX`
    /// if the view could not be created (logged).
    pub fn create_read_only_view(&self, subresource: Option<&BufferSubresourceDesc>) -> usize {
        self.create_view(ViewKind::ReadOnly, subresource)
    }

    /// Create a read-write (unordered access) view
    ///
    /// Same contract as `create_read_only_view`, indices are independent.
    pub fn create_read_write_view(&self, subresource: Option<&BufferSubresourceDesc>) -> usize {
        self.create_view(ViewKind::ReadWrite, subresource)
    }

    fn create_view(&self, kind: ViewKind, subresource: Option<&BufferSubresourceDesc>) -> usize {
        let sub = subresource.copied().unwrap_or_default();
        let Some(view_desc) = BufferViewDesc::derive(&self.desc, &sub, kind) else {
            engine_error!(SOURCE, "Cannot derive {:?} view (stride {}, format {:?}, offset {})",
                kind, self.desc.stride, self.desc.format, sub.offset);
            return INVALID_VIEW_INDEX;
        };

        match self.device.create_buffer_view(self.handle, &view_desc) {
            Ok(view) => {
                let mut views = self.views(kind).lock().unwrap_or_else(PoisonError::into_inner);
                views.push(view);
                views.len() - 1
            }
            Err(err) => {
                engine_error!(SOURCE, "Native {:?} view creation failed: {}", kind, err);
                INVALID_VIEW_INDEX
            }
        }
    }

    fn views(&self, kind: ViewKind) -> &Mutex<Vec<BufferViewHandle>> {
        match kind {
            ViewKind::ReadOnly => &self.read_only_views,
            ViewKind::ReadWrite => &self.read_write_views,
        }
    }

    fn view(&self, kind: ViewKind, index: usize) -> Option<BufferViewHandle> {
        self.views(kind).lock().unwrap_or_else(PoisonError::into_inner).get(index).copied()
    }

    fn default_view(&self, kind: ViewKind) -> Option<BufferViewHandle> {
        if let Some(view) = self.view(kind, 0) {
            return Some(view);
        }
        match self.create_view(kind, None) {
            INVALID_VIEW_INDEX => None,
            index => self.view(kind, index),
        }
    }

    /// Read-only view at `index`
    pub fn read_only_view(&self, index: usize) -> Option<BufferViewHandle> {
        self.view(ViewKind::ReadOnly, index)
    }

    /// Read-write view at `index`
    pub fn read_write_view(&self, index: usize) -> Option<BufferViewHandle> {
        self.view(ViewKind::ReadWrite, index)
    }

    /// Default read-only view over the whole buffer, created on first use
    pub fn srv(&self) -> Option<BufferViewHandle> {
        self.default_view(ViewKind::ReadOnly)
    }

    /// Default read-write view, created on first use
    ///
    /// Counter/append views must be created explicitly with
    /// `create_read_write_view` before the first call.
    pub fn uav(&self) -> Option<BufferViewHandle> {
        self.default_view(ViewKind::ReadWrite)
    }

    pub fn read_only_view_count(&self) -> usize {
        self.read_only_views.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn read_write_view_count(&self) -> usize {
        self.read_write_views.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ===== CPU ACCESS =====

    /// Map for writing; previous contents are discarded
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is Dynamic with Write access.
    pub fn map(&self) -> Result<BufferMapping<'_>> {
        assert!(
            self.desc.usage == ResourceUsage::Dynamic && self.desc.cpu_access.contains(CpuAccess::WRITE),
            "map() requires a Dynamic buffer with Write access"
        );
        self.map_with(MapMode::WriteDiscard)
    }

    /// Map for reading; blocks until the GPU finished writing
    ///
    /// # Panics
    ///
    /// Panics unless the buffer has Read access.
    pub fn map_for_read(&self) -> Result<BufferMapping<'_>> {
        assert!(self.desc.cpu_access.contains(CpuAccess::READ), "map_for_read() requires Read access");
        self.map_with(MapMode::Read)
    }

    fn map_with(&self, mode: MapMode) -> Result<BufferMapping<'_>> {
        let ptr = self.device.map_buffer(self.handle, mode)?;
        Ok(BufferMapping {
            buffer: self,
            ptr,
            len: self.desc.size as usize,
        })
    }

    /// Replace the buffer contents
    ///
    /// Dynamic buffers are discarded and rewritten from offset 0; Default
    /// buffers get a driver-managed partial update of `data.len()` bytes.
    ///
    /// # Panics
    ///
    /// Panics for Immutable and Staging buffers, or if `data` is larger than the buffer.
    pub fn update(&self, data: &[u8]) -> Result<()> {
        assert!(data.len() as u64 <= self.desc.size, "update() with {} bytes on a {}-byte buffer", data.len(), self.desc.size);
        match self.desc.usage {
            ResourceUsage::Dynamic => {
                let mut mapping = self.map()?;
                mapping[..data.len()].copy_from_slice(data);
                Ok(())
            }
            ResourceUsage::Default => self.device.update_subresource(self.handle, 0, data),
            usage => panic!("update() is not supported for {:?} buffers", usage),
        }
    }

    /// Replace the buffer contents with one plain-old-data value
    pub fn update_value<T: Pod>(&self, value: &T) -> Result<()> {
        self.update(bytemuck::bytes_of(value))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        for view in self.read_only_views.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            self.device.destroy_buffer_view(view);
        }
        for view in self.read_write_views.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            self.device.destroy_buffer_view(view);
        }
        self.device.destroy_buffer(self.handle);
    }
}

// ===== MAPPING =====

/// Mapped buffer memory, unmapped on drop
pub struct BufferMapping<'a> {
    buffer: &'a Buffer,
    ptr: NonNull<u8>,
    len: usize,
}

impl BufferMapping<'_> {
    /// Read a plain-old-data value at a byte offset
    pub fn read<T: Pod>(&self, offset: usize) -> T {
        bytemuck::pod_read_unaligned(&self[offset..offset + std::mem::size_of::<T>()])
    }

    /// Read `count` consecutive plain-old-data values starting at a byte offset
    pub fn read_slice<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        (0..count).map(|i| self.read(offset + i * size)).collect()
    }
}

impl Deref for BufferMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the device guarantees `ptr` covers the whole buffer until unmap,
        // and the mapping borrows the buffer so it cannot be dropped meanwhile.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for BufferMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `deref`; `&mut self` makes this the only live slice.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for BufferMapping<'_> {
    fn drop(&mut self) {
        self.buffer.device.unmap_buffer(self.buffer.handle);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
