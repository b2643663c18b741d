//! Unit tests for BufferObject
//!
//! Exercises allocation bookkeeping, the reference (alias) semantics,
//! update bounds enforcement and the map/unmap rules against the mock
//! backend, with no GPU involved.

#[cfg(test)]
use crate::renderer::buffer::BufferObject;
#[cfg(test)]
use crate::renderer::mock_backend::{MockAllocation, MockBackend, MockEvent};
#[cfg(test)]
use crate::renderer::{BufferKind, BufferMapType, BufferUsage};

#[cfg(test)]
fn mock_contents(buffer: &BufferObject) -> Vec<u8> {
    buffer
        .allocation()
        .unwrap()
        .as_any()
        .downcast_ref::<MockAllocation>()
        .unwrap()
        .contents()
}

// ============================================================================
// ALLOCATION
// ============================================================================

#[test]
fn test_alloc_sets_size_and_ownership() {
    let backend = MockBackend::new();
    let mut vb = BufferObject::new(BufferKind::Vertex);

    assert!(!vb.is_allocated());
    vb.alloc_buffer_object(&backend, None, 100, BufferUsage::Dynamic)
        .unwrap();

    assert!(vb.is_allocated());
    assert_eq!(vb.size(), 100);
    assert_eq!(vb.offset(), 0);
    assert!(vb.owns_buffer());
    assert!(!vb.is_mapped());
    assert_eq!(vb.usage(), BufferUsage::Dynamic);
    assert_eq!(vb.kind(), BufferKind::Vertex);
}

#[test]
fn test_alloced_size_rounds_up_to_16() {
    let backend = MockBackend::new();
    let mut ib = BufferObject::new(BufferKind::Index);
    ib.alloc_buffer_object(&backend, None, 100, BufferUsage::Static)
        .unwrap();

    assert_eq!(ib.size(), 100);
    assert_eq!(ib.alloced_size(), 112);

    // the backend saw the rounded size
    assert!(backend.events().contains(&MockEvent::Allocate {
        id: 1,
        kind: BufferKind::Index,
        usage: BufferUsage::Static,
        num_bytes: 112,
    }));
}

#[test]
#[should_panic(expected = "alloc_size = 0")]
fn test_alloc_zero_bytes_is_fatal() {
    let backend = MockBackend::new();
    let mut vb = BufferObject::new(BufferKind::Vertex);
    let _ = vb.alloc_buffer_object(&backend, None, 0, BufferUsage::Dynamic);
}

#[test]
fn test_alloc_with_initial_data_uploads() {
    let backend = MockBackend::new();
    let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let mut vb = BufferObject::new(BufferKind::Vertex);
    vb.alloc_buffer_object(&backend, Some(&data), data.len(), BufferUsage::Static)
        .unwrap();

    assert_eq!(&mock_contents(&vb)[..8], &data);
}

// ============================================================================
// UPDATE
// ============================================================================

#[test]
fn test_update_writes_at_offset() {
    let backend = MockBackend::new();
    let mut ub = BufferObject::new(BufferKind::Uniform);
    ub.alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
        .unwrap();

    ub.update(&[0xAA, 0xBB], 10).unwrap();

    let contents = mock_contents(&ub);
    assert_eq!(contents[10], 0xAA);
    assert_eq!(contents[11], 0xBB);
    assert_eq!(contents[9], 0);
    assert_eq!(contents[12], 0);
}

#[test]
fn test_update_to_exact_end_is_allowed() {
    let backend = MockBackend::new();
    let mut ub = BufferObject::new(BufferKind::Uniform);
    ub.alloc_buffer_object(&backend, None, 32, BufferUsage::Dynamic)
        .unwrap();

    // offset + len == size is in bounds
    ub.update(&[7u8; 16], 16).unwrap();
    assert_eq!(mock_contents(&ub)[31], 7);
}

#[test]
#[should_panic(expected = "size overrun")]
fn test_update_overrun_is_fatal() {
    let backend = MockBackend::new();
    let mut ub = BufferObject::new(BufferKind::Uniform);
    ub.alloc_buffer_object(&backend, None, 32, BufferUsage::Dynamic)
        .unwrap();

    let _ = ub.update(&[0u8; 16], 17);
}

// ============================================================================
// REFERENCES
// ============================================================================

#[test]
fn test_reference_range_aliases_without_owning() {
    let backend = MockBackend::new();
    let mut owner = BufferObject::new(BufferKind::Vertex);
    owner
        .alloc_buffer_object(&backend, None, 256, BufferUsage::Dynamic)
        .unwrap();

    let mut alias = BufferObject::new(BufferKind::Vertex);
    alias.reference_range(&owner, 64, 128);

    assert!(alias.is_allocated());
    assert!(!alias.owns_buffer());
    assert_eq!(alias.size(), 128);
    assert_eq!(alias.offset(), 64);

    // writes through the alias land at the composed offset
    alias.update(&[0xCC], 4).unwrap();
    assert_eq!(mock_contents(&owner)[68], 0xCC);
}

#[test]
fn test_reference_of_reference_composes_offsets() {
    let backend = MockBackend::new();
    let mut owner = BufferObject::new(BufferKind::Vertex);
    owner
        .alloc_buffer_object(&backend, None, 256, BufferUsage::Dynamic)
        .unwrap();

    let mut first = BufferObject::new(BufferKind::Vertex);
    first.reference_range(&owner, 32, 128);

    let mut second = BufferObject::new(BufferKind::Vertex);
    second.reference_range(&first, 16, 64);

    assert_eq!(second.offset(), 48);
    assert_eq!(second.size(), 64);
}

#[test]
fn test_freeing_reference_keeps_allocation_alive() {
    let backend = MockBackend::new();
    let mut owner = BufferObject::new(BufferKind::Vertex);
    owner
        .alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
        .unwrap();

    let mut alias = BufferObject::new(BufferKind::Vertex);
    alias.reference(&owner);
    alias.free_buffer_object();

    assert!(!alias.is_allocated());
    assert!(owner.is_allocated());
    assert!(!backend.events().iter().any(|e| matches!(e, MockEvent::Free { .. })));

    owner.free_buffer_object();
    assert!(backend.events().contains(&MockEvent::Free { id: 1 }));
}

#[test]
#[should_panic(expected = "outside source buffer")]
fn test_reference_past_end_is_fatal() {
    let backend = MockBackend::new();
    let mut owner = BufferObject::new(BufferKind::Vertex);
    owner
        .alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
        .unwrap();

    let mut alias = BufferObject::new(BufferKind::Vertex);
    alias.reference_range(&owner, 32, 64);
}

// ============================================================================
// MAP / UNMAP
// ============================================================================

#[test]
fn test_map_unmap_dynamic_buffer() {
    let backend = MockBackend::new();
    let mut vb = BufferObject::new(BufferKind::Vertex);
    vb.alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
        .unwrap();

    let ptr = vb.map_buffer(BufferMapType::Write).unwrap();
    assert!(vb.is_mapped());

    unsafe {
        ptr.as_ptr().write(42);
    }
    vb.unmap_buffer();
    assert!(!vb.is_mapped());
    assert_eq!(mock_contents(&vb)[0], 42);
}

#[test]
#[should_panic(expected = "marked as Static")]
fn test_map_static_buffer_is_fatal() {
    let backend = MockBackend::new();
    let mut vb = BufferObject::new(BufferKind::Vertex);
    vb.alloc_buffer_object(&backend, None, 64, BufferUsage::Static)
        .unwrap();

    let _ = vb.map_buffer(BufferMapType::Write);
}

#[test]
fn test_free_unmaps_first() {
    let backend = MockBackend::new();
    let mut vb = BufferObject::new(BufferKind::Vertex);
    vb.alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
        .unwrap();

    vb.map_buffer(BufferMapType::Write).unwrap();
    vb.free_buffer_object();

    assert!(!vb.is_mapped());
    assert!(!vb.is_allocated());
}

// ============================================================================
// DROP
// ============================================================================

#[test]
fn test_drop_frees_owned_allocation() {
    let backend = MockBackend::new();
    {
        let mut vb = BufferObject::new(BufferKind::Vertex);
        vb.alloc_buffer_object(&backend, None, 64, BufferUsage::Dynamic)
            .unwrap();
    }
    assert!(backend.events().contains(&MockEvent::Free { id: 1 }));
}
