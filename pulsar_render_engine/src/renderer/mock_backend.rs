/// Mock backend for unit tests (no GPU required)
///
/// Implements BufferAllocator and RenderBackend over plain host memory and
/// records every backend call, so tests can assert allocation lifetimes,
/// command submission order and the frame-lag handshake without a device.

use std::any::Any;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::renderer::{
    BackendStats, BufferAllocation, BufferAllocator, BufferKind, BufferObject, BufferUsage,
    CommandList, RenderBackend, RenderCommand, RenderConfig, VertexCache,
};

// ============================================================================
// Event log
// ============================================================================

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Allocate {
        id: u64,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    },
    Write {
        id: u64,
        offset: usize,
        len: usize,
    },
    Free {
        id: u64,
    },
    Execute {
        num_commands: usize,
        has_draw_view: bool,
        surfs_resolved: usize,
        surfs_stale: usize,
    },
    Swap,
}

// ============================================================================
// Mock allocation
// ============================================================================

/// Host-memory stand-in for a device allocation
pub struct MockAllocation {
    id: u64,
    bytes: UnsafeCell<Box<[u8]>>,
    freed: AtomicBool,
    events: Arc<Mutex<Vec<MockEvent>>>,
}

// Tests hand out a raw mapped pointer just like a persistently mapped
// device allocation would; callers are responsible for not aliasing writes.
unsafe impl Sync for MockAllocation {}
unsafe impl Send for MockAllocation {}

impl MockAllocation {
    /// Snapshot of the allocation contents, for asserting uploads landed
    pub fn contents(&self) -> Vec<u8> {
        unsafe { (*self.bytes.get()).to_vec() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Relaxed)
    }
}

impl BufferAllocation for MockAllocation {
    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let bytes = unsafe { &mut *self.bytes.get() };
        if offset + data.len() > bytes.len() {
            return Err(Error::InvalidResource(format!(
                "mock write {} + {} beyond {} bytes",
                offset,
                data.len(),
                bytes.len()
            )));
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        self.events.lock().unwrap().push(MockEvent::Write {
            id: self.id,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn mapped_ptr(&self, offset: usize) -> Result<NonNull<u8>> {
        let bytes = unsafe { &mut *self.bytes.get() };
        if offset >= bytes.len() {
            return Err(Error::InvalidResource(format!(
                "mock map at {} beyond {} bytes",
                offset,
                bytes.len()
            )));
        }
        NonNull::new(bytes.as_mut_ptr().wrapping_add(offset))
            .ok_or_else(|| Error::InvalidResource("null mock mapping".to_string()))
    }

    fn free(&self) {
        self.freed.store(true, Ordering::Relaxed);
        self.events.lock().unwrap().push(MockEvent::Free { id: self.id });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock backend
// ============================================================================

pub struct MockBackend {
    next_id: AtomicU64,
    events: Arc<Mutex<Vec<MockEvent>>>,
    stats: BackendStats,
    pub swap_count: u64,
    pub execute_count: u64,
    pub resize_events: Vec<(u32, u32)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            events: Arc::new(Mutex::new(Vec::new())),
            stats: BackendStats::default(),
            swap_count: 0,
            execute_count: 0,
            resize_events: Vec::new(),
        }
    }

    /// All recorded events in call order
    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Shared handle to the event log, for tests that box the backend away
    pub fn events_handle(&self) -> Arc<Mutex<Vec<MockEvent>>> {
        self.events.clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Allocate directly, keeping the concrete type for content checks
    pub fn allocate_mock(
        &self,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    ) -> Arc<MockAllocation> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.events.lock().unwrap().push(MockEvent::Allocate {
            id,
            kind,
            usage,
            num_bytes,
        });
        Arc::new(MockAllocation {
            id,
            bytes: UnsafeCell::new(vec![0u8; num_bytes].into_boxed_slice()),
            freed: AtomicBool::new(false),
            events: self.events.clone(),
        })
    }
}

impl BufferAllocator for MockBackend {
    fn allocate(
        &self,
        kind: BufferKind,
        usage: BufferUsage,
        num_bytes: usize,
    ) -> Result<Arc<dyn BufferAllocation>> {
        Ok(self.allocate_mock(kind, usage, num_bytes))
    }
}

impl RenderBackend for MockBackend {
    fn execute_backend_commands(
        &mut self,
        cmds: &CommandList,
        vertex_cache: &VertexCache,
    ) -> Result<()> {
        self.execute_count += 1;

        // resolve each surface's cache handles the way a device backend
        // would before binding, so tests can assert staleness handling
        let mut surfs_resolved = 0;
        let mut surfs_stale = 0;
        let mut vertex_buffer = BufferObject::new(BufferKind::Vertex);
        let mut index_buffer = BufferObject::new(BufferKind::Index);
        for cmd in cmds {
            if let RenderCommand::DrawView { view, .. } = cmd {
                for surf in &view.draw_surfs {
                    if vertex_cache.get_vertex_buffer(surf.vertex_cache, &mut vertex_buffer)
                        && vertex_cache.get_index_buffer(surf.index_cache, &mut index_buffer)
                    {
                        surfs_resolved += 1;
                    } else {
                        surfs_stale += 1;
                    }
                }
            }
        }

        self.events.lock().unwrap().push(MockEvent::Execute {
            num_commands: cmds.len(),
            has_draw_view: cmds.has_draw_view(),
            surfs_resolved,
            surfs_stale,
        });
        Ok(())
    }

    fn blocking_swap_buffers(&mut self) -> Result<()> {
        self.swap_count += 1;
        self.events.lock().unwrap().push(MockEvent::Swap);
        Ok(())
    }

    fn check_cvars(&mut self, _config: &RenderConfig) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.resize_events.push((width, height));
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
#[path = "mock_backend_tests.rs"]
mod tests;
