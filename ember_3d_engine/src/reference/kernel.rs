/// CPU compute kernels for the reference device
///
/// A compute shader created on the reference device is resolved by its entry
/// point to a registered `ReferenceKernel`. A dispatch runs the kernel once per
/// thread group, sequentially; the kernel loops over its own threads and sees
/// the bound resources through a `KernelContext`.
///
/// Out-of-range loads return zero and out-of-range stores are dropped, like on
/// the GPU. Unbound slots and type mismatches are errors.

use bytemuck::{Pod, Zeroable};
use crate::error::{Error, Result};
use crate::graphics_device::{BufferHandle, BufferViewHandle, ResourceView, Format};
use crate::reference::device::Resources;

/// A compute program executed on the CPU
pub trait ReferenceKernel: Send + Sync {
    /// Execute every thread of one thread group
    fn run_group(&self, ctx: &mut KernelContext<'_>, group_id: [u32; 3]) -> Result<()>;
}

impl<F> ReferenceKernel for F
where
    F: Fn(&mut KernelContext<'_>, [u32; 3]) -> Result<()> + Send + Sync,
{
    fn run_group(&self, ctx: &mut KernelContext<'_>, group_id: [u32; 3]) -> Result<()> {
        self(ctx, group_id)
    }
}

/// Resources bound to the compute stage during one dispatch
pub struct KernelContext<'a> {
    pub(crate) resources: &'a mut Resources,
    pub(crate) constant_buffers: &'a [Option<BufferHandle>],
    pub(crate) shader_resources: &'a [Option<ResourceView>],
    pub(crate) unordered_access: &'a [Option<ResourceView>],
}

fn unbound(kind: &str, slot: u32) -> Error {
    Error::InvalidResource(format!("nothing bound to {}{}", kind, slot))
}

impl<'a> KernelContext<'a> {
    // ===== CONSTANTS =====

    /// Read constant buffer `b{slot}` as `T`
    pub fn constants<T: Pod>(&self, slot: u32) -> Result<T> {
        let buffer = self.constant_buffers.get(slot as usize).copied().flatten()
            .ok_or_else(|| unbound("b", slot))?;
        let data = &self.resources.buffer(buffer)?.data;
        let size = std::mem::size_of::<T>();
        if data.len() < size {
            return Err(Error::InvalidResource(format!("constant buffer b{} smaller than {} bytes", slot, size)));
        }
        Ok(bytemuck::pod_read_unaligned(&data[..size]))
    }

    // ===== BUFFER VIEWS =====

    fn srv_buffer_view(&self, slot: u32) -> Result<BufferViewHandle> {
        match self.shader_resources.get(slot as usize).copied().flatten() {
            Some(ResourceView::Buffer(view)) => Ok(view),
            Some(ResourceView::Texture(_)) => Err(Error::InvalidResource(format!("t{} is a texture view", slot))),
            None => Err(unbound("t", slot)),
        }
    }

    fn uav_buffer_view(&self, slot: u32) -> Result<BufferViewHandle> {
        match self.unordered_access.get(slot as usize).copied().flatten() {
            Some(ResourceView::Buffer(view)) => Ok(view),
            Some(ResourceView::Texture(_)) => Err(Error::InvalidResource(format!("u{} is a texture view", slot))),
            None => Err(unbound("u", slot)),
        }
    }

    /// Byte offset of element `index` of `T`, None when out of range
    fn element_offset<T>(&self, view: BufferViewHandle, index: u32) -> Result<Option<(BufferHandle, usize)>> {
        let view = self.resources.buffer_view(view)?;
        let size = std::mem::size_of::<T>();
        if size > view.desc.element_size as usize {
            return Err(Error::InvalidResource(format!(
                "{}-byte element type on a view of {}-byte elements", size, view.desc.element_size)));
        }
        if index as u64 >= view.desc.num_elements {
            return Ok(None);
        }
        let offset = (view.desc.first_element + index as u64) * view.desc.element_size as u64;
        Ok(Some((view.buffer, offset as usize)))
    }

    fn load_view<T: Pod>(&self, view: BufferViewHandle, index: u32) -> Result<T> {
        match self.element_offset::<T>(view, index)? {
            Some((buffer, offset)) => {
                let data = &self.resources.buffer(buffer)?.data;
                Ok(bytemuck::pod_read_unaligned(&data[offset..offset + std::mem::size_of::<T>()]))
            }
            None => Ok(T::zeroed()),
        }
    }

    /// Number of elements visible through `t{slot}`
    pub fn srv_len(&self, slot: u32) -> Result<u32> {
        let view = self.srv_buffer_view(slot)?;
        Ok(self.resources.buffer_view(view)?.desc.num_elements as u32)
    }

    /// Number of elements visible through `u{slot}`
    pub fn uav_len(&self, slot: u32) -> Result<u32> {
        let view = self.uav_buffer_view(slot)?;
        Ok(self.resources.buffer_view(view)?.desc.num_elements as u32)
    }

    /// Load element `index` from read-only buffer `t{slot}`
    pub fn load<T: Pod>(&self, slot: u32, index: u32) -> Result<T> {
        self.load_view(self.srv_buffer_view(slot)?, index)
    }

    /// Load element `index` from read-write buffer `u{slot}`
    pub fn load_rw<T: Pod>(&self, slot: u32, index: u32) -> Result<T> {
        self.load_view(self.uav_buffer_view(slot)?, index)
    }

    /// Store element `index` into read-write buffer `u{slot}`
    pub fn store<T: Pod>(&mut self, slot: u32, index: u32, value: &T) -> Result<()> {
        let view = self.uav_buffer_view(slot)?;
        if let Some((buffer, offset)) = self.element_offset::<T>(view, index)? {
            let bytes = bytemuck::bytes_of(value);
            self.resources.buffer_mut(buffer)?.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    // ===== COUNTERS =====

    /// Increment the hidden counter of `u{slot}`, returning the previous value
    pub fn increment_counter(&mut self, slot: u32) -> Result<u32> {
        let view = self.uav_buffer_view(slot)?;
        let view = self.resources.buffer_view_mut(view)?;
        if !view.desc.uav_flags.has_counter() {
            return Err(Error::InvalidResource(format!("u{} has no counter", slot)));
        }
        let previous = view.counter;
        view.counter = view.counter.wrapping_add(1);
        Ok(previous)
    }

    /// Decrement the hidden counter of `u{slot}`, returning the new value
    pub fn decrement_counter(&mut self, slot: u32) -> Result<u32> {
        let view = self.uav_buffer_view(slot)?;
        let view = self.resources.buffer_view_mut(view)?;
        if !view.desc.uav_flags.has_counter() {
            return Err(Error::InvalidResource(format!("u{} has no counter", slot)));
        }
        view.counter = view.counter.wrapping_sub(1);
        Ok(view.counter)
    }

    /// Append `value` to append buffer `u{slot}`
    pub fn append<T: Pod>(&mut self, slot: u32, value: &T) -> Result<()> {
        let index = self.increment_counter(slot)?;
        self.store(slot, index, value)
    }

    /// Pop the last element of consume buffer `u{slot}`
    pub fn consume<T: Pod>(&mut self, slot: u32) -> Result<T> {
        let index = self.decrement_counter(slot)?;
        self.load_rw(slot, index)
    }

    // ===== TEXTURES =====

    /// Whether anything is bound to `t{slot}`
    pub fn is_srv_bound(&self, slot: u32) -> bool {
        matches!(self.shader_resources.get(slot as usize), Some(Some(_)))
    }

    /// Width and height of mip 0 of texture `t{slot}`
    pub fn texture_dimensions(&self, slot: u32) -> Result<(u32, u32)> {
        let texture = self.srv_texture(slot)?;
        let desc = &self.resources.texture(texture.0)?.desc;
        Ok((desc.width, desc.height))
    }

    fn srv_texture(&self, slot: u32) -> Result<(crate::graphics_device::TextureHandle, u32)> {
        match self.shader_resources.get(slot as usize).copied().flatten() {
            Some(ResourceView::Texture(view)) => {
                let view = self.resources.texture_view(view)?;
                Ok((view.texture, view.desc.subresource.first_slice))
            }
            Some(ResourceView::Buffer(_)) => Err(Error::InvalidResource(format!("t{} is a buffer view", slot))),
            None => Err(unbound("t", slot)),
        }
    }

    /// Load texel (x, y) of mip 0 of texture `t{slot}` as RGBA
    ///
    /// Missing channels read as 0, missing alpha as 1.
    pub fn texture_load(&self, slot: u32, x: u32, y: u32) -> Result<[f32; 4]> {
        let (texture, slice) = self.srv_texture(slot)?;
        let texture = self.resources.texture(texture)?;
        let desc = &texture.desc;
        if x >= desc.width || y >= desc.height {
            return Ok([0.0; 4]);
        }
        let stride = desc.format.stride() as usize;
        let slice_size = desc.width as usize * desc.height as usize * stride;
        let offset = slice as usize * slice_size + (y as usize * desc.width as usize + x as usize) * stride;
        let texel = &texture.data[offset..offset + stride];
        decode_texel(desc.format, texel)
    }
}

/// Decode one texel of a 32-bit-per-channel or 8-bit UNORM format
pub(crate) fn decode_texel(format: Format, texel: &[u8]) -> Result<[f32; 4]> {
    let mut out = [0.0, 0.0, 0.0, 1.0];
    match format {
        Format::R32_FLOAT | Format::D32_FLOAT | Format::R32G32_FLOAT
        | Format::R32G32B32_FLOAT | Format::R32G32B32A32_FLOAT => {
            for (channel, bytes) in texel.chunks_exact(4).enumerate() {
                out[channel] = bytemuck::pod_read_unaligned(bytes);
            }
        }
        Format::R8G8B8A8_UNORM | Format::R8G8B8A8_UNORM_SRGB => {
            for (channel, &byte) in texel.iter().enumerate() {
                out[channel] = byte as f32 / 255.0;
            }
        }
        other => {
            return Err(Error::InvalidResource(format!("reference texture loads do not support {:?}", other)));
        }
    }
    Ok(out)
}

/// Encode an RGBA value as one texel of `format`
pub(crate) fn encode_texel(format: Format, value: [f32; 4]) -> Vec<u8> {
    let channels = format.channel_count() as usize;
    match format {
        Format::R8G8B8A8_UNORM | Format::R8G8B8A8_UNORM_SRGB => value
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
        Format::R32_UINT | Format::R32G32_UINT | Format::R32G32B32_UINT | Format::R32G32B32A32_UINT => value[..channels]
            .iter()
            .flat_map(|v| (*v as u32).to_le_bytes())
            .collect(),
        _ if format.stride() == 4 * channels as u32 => value[..channels]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        _ => vec![0; format.stride() as usize],
    }
}
