//! Unit tests for the mock backend itself
//!
//! The mock is the foundation of every other renderer test, so its
//! bookkeeping gets checked directly.

#[cfg(test)]
use crate::renderer::mock_backend::{MockBackend, MockEvent};
#[cfg(test)]
use crate::renderer::{
    BufferAllocation, BufferKind, BufferUsage, CommandList, RenderBackend, VertexCache,
};

#[test]
fn test_allocate_records_event_and_ids_increment() {
    let backend = MockBackend::new();
    let a = backend.allocate_mock(BufferKind::Vertex, BufferUsage::Dynamic, 64);
    let b = backend.allocate_mock(BufferKind::Index, BufferUsage::Static, 32);

    assert_eq!(a.id(), 1);
    assert_eq!(b.id(), 2);
    assert_eq!(backend.events().len(), 2);
}

#[test]
fn test_write_within_bounds() {
    let backend = MockBackend::new();
    let alloc = backend.allocate_mock(BufferKind::Uniform, BufferUsage::Dynamic, 16);

    alloc.write(4, &[9, 9]).unwrap();
    assert_eq!(alloc.contents()[4], 9);
    assert_eq!(alloc.contents()[5], 9);
}

#[test]
fn test_write_out_of_bounds_errors() {
    let backend = MockBackend::new();
    let alloc = backend.allocate_mock(BufferKind::Uniform, BufferUsage::Dynamic, 16);
    assert!(alloc.write(15, &[0, 0]).is_err());
}

#[test]
fn test_free_is_recorded() {
    let backend = MockBackend::new();
    let alloc = backend.allocate_mock(BufferKind::Vertex, BufferUsage::Dynamic, 16);

    assert!(!alloc.is_freed());
    alloc.free();
    assert!(alloc.is_freed());
    assert!(backend.events().contains(&MockEvent::Free { id: 1 }));
}

#[test]
fn test_execute_and_swap_are_counted() {
    let mut backend = MockBackend::new();
    backend
        .execute_backend_commands(&CommandList::new(), &VertexCache::new())
        .unwrap();
    backend.blocking_swap_buffers().unwrap();
    backend.blocking_swap_buffers().unwrap();

    assert_eq!(backend.execute_count, 1);
    assert_eq!(backend.swap_count, 2);
}
