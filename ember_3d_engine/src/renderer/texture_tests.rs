//! Unit tests for Texture

use super::*;
use crate::graphics_device::ResourceUsage;
use crate::reference::ReferenceDevice;

fn devices() -> (Arc<ReferenceDevice>, Arc<dyn GraphicsDevice>) {
    let reference = Arc::new(ReferenceDevice::new());
    let device: Arc<dyn GraphicsDevice> = reference.clone();
    (reference, device)
}

#[test]
fn test_view_format_samples_depth_as_float() {
    assert_eq!(view_format(Format::D32_FLOAT, TextureViewKind::ReadOnly), Format::R32_FLOAT);
    assert_eq!(view_format(Format::D32_FLOAT, TextureViewKind::DepthStencil), Format::D32_FLOAT);
    assert_eq!(view_format(Format::R8G8B8A8_UNORM, TextureViewKind::ReadOnly), Format::R8G8B8A8_UNORM);
}

#[test]
fn test_texture_dimensions() {
    let (_, device) = devices();
    let texture = Texture::new(device, TextureDesc::texture_2d(64, 32, Format::R8G8B8A8_UNORM), None);

    assert_eq!(texture.width(), 64);
    assert_eq!(texture.height(), 32);
    assert_eq!(texture.desc().format, Format::R8G8B8A8_UNORM);
}

#[test]
fn test_immutable_texture_requires_data() {
    let (_, device) = devices();
    let desc = TextureDesc { usage: ResourceUsage::Immutable, ..TextureDesc::texture_2d(4, 4, Format::R8G8B8A8_UNORM) };

    assert!(Texture::try_new(Arc::clone(&device), desc, None).is_err());
    assert!(Texture::try_new(device, desc, Some(&[255; 64])).is_ok());
}

#[test]
fn test_default_views_by_kind() {
    let (_, device) = devices();
    let depth = Texture::new(device, TextureDesc::depth_target(8, 8), None);

    let dsv = depth.dsv();
    assert!(dsv.is_some());
    assert_eq!(depth.dsv(), dsv);
    assert!(depth.srv().is_some());
    assert_ne!(depth.srv(), dsv);
}

#[test]
fn test_view_requires_bind_flag() {
    let (_, device) = devices();
    let texture = Texture::new(device, TextureDesc::texture_2d(8, 8, Format::R8G8B8A8_UNORM), None);

    assert_eq!(texture.create_view(TextureViewKind::RenderTarget, None), INVALID_VIEW_INDEX);
    assert_eq!(texture.rtv(), None);
    assert_eq!(texture.uav(), None);
}

#[test]
fn test_explicit_views_are_indexed_per_kind() {
    let (_, device) = devices();
    let texture = Texture::new(device, TextureDesc::render_target(8, 8, Format::R8G8B8A8_UNORM), None);

    let mip = TextureSubresourceDesc { first_mip: 0, mip_count: 1, ..Default::default() };
    assert_eq!(texture.create_view(TextureViewKind::ReadOnly, Some(&mip)), 0);
    assert_eq!(texture.create_view(TextureViewKind::RenderTarget, None), 0);
    assert_eq!(texture.create_view(TextureViewKind::ReadOnly, None), 1);
    assert!(texture.view(TextureViewKind::ReadOnly, 1).is_some());
    assert!(texture.view(TextureViewKind::RenderTarget, 1).is_none());
}

#[test]
fn test_drop_releases_texture_and_views() {
    let (reference, device) = devices();
    {
        let texture = Texture::new(device, TextureDesc::render_target(8, 8, Format::R8G8B8A8_UNORM), None);
        texture.srv();
        texture.rtv();
        assert_eq!(reference.live_object_count(), 3);
    }
    assert_eq!(reference.live_object_count(), 0);
}
