//! Unit tests for Buffer
//!
//! Runs against the reference device, which validates descriptors and views
//! the way a native driver would.

use super::*;
use crate::graphics_device::{BindFlags, BufferMiscFlags, UavFlags};
use crate::reference::ReferenceDevice;

fn devices() -> (Arc<ReferenceDevice>, Arc<dyn GraphicsDevice>) {
    let reference = Arc::new(ReferenceDevice::new());
    let device: Arc<dyn GraphicsDevice> = reference.clone();
    (reference, device)
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect()
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Element {
    a: [f32; 3],
    b: u32,
}

// ============================================================================
// CREATION
// ============================================================================

#[test]
fn test_structured_buffer_element_count() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::structured::<Element>(64, true, false), None);

    assert_eq!(buffer.size(), 64 * 16);
    assert_eq!(buffer.stride(), 16);
    assert_eq!(buffer.element_count(), 64);
}

#[test]
fn test_with_data_uploads_elements() {
    let (reference, device) = devices();
    let indices: [u32; 6] = [0, 1, 2, 2, 1, 3];
    let buffer = Buffer::with_data(device, BufferDesc::index_buffer(6, false), &indices);

    let contents = reference.buffer_contents(buffer.handle()).unwrap();
    assert_eq!(words(&contents), indices);
}

#[test]
fn test_try_new_rejects_oversized_initial_data() {
    let (_, device) = devices();
    let data = [0u8; 32];
    let result = Buffer::try_new(device, BufferDesc::constant_buffer(16), Some(&data));
    assert!(result.is_err());
}

#[test]
fn test_try_new_reports_native_failure() {
    let (_, device) = devices();
    // Immutable without data
    let result = Buffer::try_new(device, BufferDesc::vertex_buffer(4, 12), None);
    assert!(result.is_err());
}

#[test]
#[should_panic(expected = "Buffer creation failed")]
fn test_new_panics_on_native_failure() {
    let (_, device) = devices();
    Buffer::new(device, BufferDesc { size: 0, ..Default::default() }, None);
}

// ============================================================================
// VIEWS
// ============================================================================

#[test]
fn test_default_views_are_created_lazily() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::structured::<Element>(8, true, false), None);
    assert_eq!(buffer.read_only_view_count(), 0);
    assert_eq!(buffer.read_write_view_count(), 0);

    let srv = buffer.srv();
    assert!(srv.is_some());
    assert_eq!(buffer.srv(), srv);
    assert_eq!(buffer.read_only_view_count(), 1);

    assert!(buffer.uav().is_some());
    assert_eq!(buffer.read_write_view_count(), 1);
}

#[test]
fn test_explicit_counter_view_becomes_default() {
    let (reference, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::append(16, 4), None);

    let index = buffer.create_read_write_view(Some(&BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND)));
    assert_eq!(index, 0);
    assert_eq!(buffer.uav(), buffer.read_write_view(0));
    assert_eq!(reference.view_counter(buffer.uav().unwrap()), Some(0));
}

#[test]
fn test_view_indices_follow_creation_order() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::structured::<Element>(8, false, false), None);

    let first = BufferSubresourceDesc { offset: 0, size: 64, ..Default::default() };
    let second = BufferSubresourceDesc { offset: 64, size: 64, ..Default::default() };
    assert_eq!(buffer.create_read_only_view(Some(&first)), 0);
    assert_eq!(buffer.create_read_only_view(Some(&second)), 1);
    assert_ne!(buffer.read_only_view(0), buffer.read_only_view(1));
    assert_eq!(buffer.read_only_view(2), None);
}

#[test]
fn test_read_write_view_requires_bind_flag() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::structured::<Element>(8, false, false), None);

    assert_eq!(buffer.create_read_write_view(None), INVALID_VIEW_INDEX);
    assert_eq!(buffer.uav(), None);
}

#[test]
fn test_counter_view_requires_structured_buffer() {
    let (_, device) = devices();
    let desc = BufferDesc {
        size: 64,
        bind_flags: BindFlags::UNORDERED_ACCESS,
        misc_flags: BufferMiscFlags::RAW,
        ..Default::default()
    };
    let buffer = Buffer::new(device, desc, None);

    let counter = BufferSubresourceDesc::with_uav_flags(UavFlags::COUNTER);
    assert_eq!(buffer.create_read_write_view(Some(&counter)), INVALID_VIEW_INDEX);
}

#[test]
fn test_view_outside_buffer_is_rejected() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::structured::<Element>(4, false, false), None);

    let past_end = BufferSubresourceDesc { offset: 64, size: 16, ..Default::default() };
    assert_eq!(buffer.create_read_only_view(Some(&past_end)), INVALID_VIEW_INDEX);
}

// ============================================================================
// CPU ACCESS
// ============================================================================

#[test]
fn test_map_writes_dynamic_buffer() {
    let (reference, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::constant_buffer(16), None);
    {
        let mut mapping = buffer.map().unwrap();
        mapping[..4].copy_from_slice(&7u32.to_le_bytes());
    }
    assert_eq!(&reference.buffer_contents(buffer.handle()).unwrap()[..4], &7u32.to_le_bytes());
}

#[test]
fn test_mapping_is_released_on_drop() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::constant_buffer(16), None);

    drop(buffer.map().unwrap());
    assert!(buffer.map().is_ok());
}

#[test]
fn test_double_map_fails() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::constant_buffer(16), None);

    let _mapping = buffer.map().unwrap();
    assert!(buffer.map().is_err());
}

#[test]
#[should_panic(expected = "requires a Dynamic buffer")]
fn test_map_default_buffer_panics() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::gpu_constant_buffer(16), None);
    let _ = buffer.map();
}

#[test]
fn test_update_dynamic_and_default_buffers() {
    let (reference, device) = devices();
    let dynamic = Buffer::new(Arc::clone(&device), BufferDesc::constant_buffer(16), None);
    let gpu = Buffer::new(device, BufferDesc::gpu_constant_buffer(16), None);

    dynamic.update_value(&[1u32, 2, 3, 4]).unwrap();
    gpu.update(&9u32.to_le_bytes()).unwrap();

    assert_eq!(words(&reference.buffer_contents(dynamic.handle()).unwrap()), vec![1, 2, 3, 4]);
    assert_eq!(words(&reference.buffer_contents(gpu.handle()).unwrap()), vec![9, 0, 0, 0]);
}

#[test]
#[should_panic(expected = "not supported for Immutable")]
fn test_update_immutable_buffer_panics() {
    let (_, device) = devices();
    let buffer = Buffer::with_data(device, BufferDesc::vertex_buffer(1, 4), &[1u32]);
    let _ = buffer.update(&[0; 4]);
}

#[test]
fn test_map_for_read_typed_access() {
    let (_, device) = devices();
    let buffer = Buffer::new(device, BufferDesc::readback(16), None);

    let mapping = buffer.map_for_read().unwrap();
    assert_eq!(mapping.len(), 16);
    assert_eq!(mapping.read::<u32>(4), 0);
    assert_eq!(mapping.read_slice::<u32>(0, 4), vec![0; 4]);
}

// ============================================================================
// LIFETIME
// ============================================================================

#[test]
fn test_drop_releases_buffer_and_views() {
    let (reference, device) = devices();
    {
        let buffer = Buffer::new(device, BufferDesc::structured::<Element>(8, true, false), None);
        buffer.srv();
        buffer.uav();
        assert_eq!(reference.live_object_count(), 3);
    }
    assert_eq!(reference.live_object_count(), 0);
}
