/// GPU texture with per-kind view lists
///
/// Mirrors Buffer: one native texture, views addressed by index in creation
/// order, all views destroyed with the texture.

use std::sync::{Arc, Mutex, PoisonError};
use crate::error::Result;
use crate::engine_error;
use crate::graphics_device::{
    GraphicsDevice, TextureHandle, TextureViewHandle, TextureDesc, TextureViewDesc,
    TextureViewKind, TextureSubresourceDesc, BindFlags, Format,
};
use crate::renderer::INVALID_VIEW_INDEX;

const SOURCE: &str = "ember3d::Texture";

pub struct Texture {
    device: Arc<dyn GraphicsDevice>,
    handle: TextureHandle,
    desc: TextureDesc,
    views: [Mutex<Vec<TextureViewHandle>>; 4],
}

fn kind_index(kind: TextureViewKind) -> usize {
    match kind {
        TextureViewKind::ReadOnly => 0,
        TextureViewKind::ReadWrite => 1,
        TextureViewKind::RenderTarget => 2,
        TextureViewKind::DepthStencil => 3,
    }
}

fn required_bind_flag(kind: TextureViewKind) -> BindFlags {
    match kind {
        TextureViewKind::ReadOnly => BindFlags::SHADER_RESOURCE,
        TextureViewKind::ReadWrite => BindFlags::UNORDERED_ACCESS,
        TextureViewKind::RenderTarget => BindFlags::RENDER_TARGET,
        TextureViewKind::DepthStencil => BindFlags::DEPTH_STENCIL,
    }
}

/// Format a view of `kind` uses over a texture of `format`
///
/// Depth textures are sampled as R32_FLOAT.
pub fn view_format(format: Format, kind: TextureViewKind) -> Format {
    match (format, kind) {
        (Format::D32_FLOAT, TextureViewKind::ReadOnly) => Format::R32_FLOAT,
        _ => format,
    }
}

impl Texture {
    /// Create a texture, uploading mip 0 from `initial_data` if given
    ///
    /// # Panics
    ///
    /// Panics (after logging the native error) if the device rejects the texture.
    pub fn new(device: Arc<dyn GraphicsDevice>, desc: TextureDesc, initial_data: Option<&[u8]>) -> Self {
        match Self::try_new(device, desc, initial_data) {
            Ok(texture) => texture,
            Err(err) => panic!("Texture creation failed: {}", err),
        }
    }

    pub fn try_new(device: Arc<dyn GraphicsDevice>, desc: TextureDesc, initial_data: Option<&[u8]>) -> Result<Self> {
        let handle = device.create_texture(&desc, initial_data).map_err(|err| {
            engine_error!(SOURCE, "Native texture creation failed ({}x{} {:?}): {}",
                desc.width, desc.height, desc.format, err);
            err
        })?;
        Ok(Self {
            device,
            handle,
            desc,
            views: Default::default(),
        })
    }

    pub fn desc(&self) -> &TextureDesc { &self.desc }

    pub fn handle(&self) -> TextureHandle { self.handle }

    pub fn width(&self) -> u32 { self.desc.width }

    pub fn height(&self) -> u32 { self.desc.height }

    /// Create a view; returns its index or `INVALID_VIEW_INDEX` (logged)
    pub fn create_view(&self, kind: TextureViewKind, subresource: Option<&TextureSubresourceDesc>) -> usize {
        if !self.desc.bind_flags.contains(required_bind_flag(kind)) {
            engine_error!(SOURCE, "Texture lacks bind flag for {:?} view", kind);
            return INVALID_VIEW_INDEX;
        }
        let view_desc = TextureViewDesc {
            kind,
            format: view_format(self.desc.format, kind),
            subresource: subresource.copied().unwrap_or_default(),
        };
        match self.device.create_texture_view(self.handle, &view_desc) {
            Ok(view) => {
                let mut views = self.views[kind_index(kind)].lock().unwrap_or_else(PoisonError::into_inner);
                views.push(view);
                views.len() - 1
            }
            Err(err) => {
                engine_error!(SOURCE, "Native {:?} texture view creation failed: {}", kind, err);
                INVALID_VIEW_INDEX
            }
        }
    }

    /// View of `kind` at `index`
    pub fn view(&self, kind: TextureViewKind, index: usize) -> Option<TextureViewHandle> {
        self.views[kind_index(kind)].lock().unwrap_or_else(PoisonError::into_inner).get(index).copied()
    }

    /// Default view of `kind` over the whole texture, created on first use
    pub fn default_view(&self, kind: TextureViewKind) -> Option<TextureViewHandle> {
        if let Some(view) = self.view(kind, 0) {
            return Some(view);
        }
        match self.create_view(kind, None) {
            INVALID_VIEW_INDEX => None,
            index => self.view(kind, index),
        }
    }

    pub fn srv(&self) -> Option<TextureViewHandle> { self.default_view(TextureViewKind::ReadOnly) }

    pub fn uav(&self) -> Option<TextureViewHandle> { self.default_view(TextureViewKind::ReadWrite) }

    pub fn rtv(&self) -> Option<TextureViewHandle> { self.default_view(TextureViewKind::RenderTarget) }

    pub fn dsv(&self) -> Option<TextureViewHandle> { self.default_view(TextureViewKind::DepthStencil) }
}

impl Drop for Texture {
    fn drop(&mut self) {
        for views in &mut self.views {
            for view in views.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
                self.device.destroy_texture_view(view);
            }
        }
        self.device.destroy_texture(self.handle);
    }
}

#[cfg(test)]
#[path = "texture_tests.rs"]
mod tests;
