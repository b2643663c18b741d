//! Unit tests for the per-frame arena
//!
//! Covers bump-allocation alignment, the hard out-of-memory failure,
//! command charging and the slot reset cycle.

#[cfg(test)]
use crate::renderer::frame_data::{FrameAllocKind, FrameData, FRAME_ALLOC_ALIGNMENT, MAX_FRAME_MEMORY};
#[cfg(test)]
use crate::renderer::{RenderCommand, ScreenRect, ViewDef};

#[test]
fn test_frame_alloc_rounds_to_alignment() {
    let mut frame = FrameData::new();

    let block = frame.frame_alloc(1, FrameAllocKind::Unknown);
    assert_eq!(block.len(), FRAME_ALLOC_ALIGNMENT);
    assert_eq!(frame.allocated(), FRAME_ALLOC_ALIGNMENT);

    frame.frame_alloc(FRAME_ALLOC_ALIGNMENT + 1, FrameAllocKind::Unknown);
    assert_eq!(frame.allocated(), 3 * FRAME_ALLOC_ALIGNMENT);
}

#[test]
fn test_frame_alloc_exact_capacity_is_allowed() {
    let mut frame = FrameData::new();
    let block = frame.frame_alloc(MAX_FRAME_MEMORY, FrameAllocKind::Unknown);
    assert_eq!(block.len(), MAX_FRAME_MEMORY);
}

#[test]
#[should_panic(expected = "ran out of memory")]
fn test_frame_alloc_overflow_is_fatal() {
    let mut frame = FrameData::new();
    frame.frame_alloc(MAX_FRAME_MEMORY, FrameAllocKind::Unknown);
    frame.frame_alloc(1, FrameAllocKind::Unknown);
}

#[test]
fn test_cleared_frame_alloc_zeroes_memory() {
    let mut frame = FrameData::new();

    // dirty some memory, then reclaim the slot
    frame.frame_alloc(256, FrameAllocKind::Unknown).fill(0xFF);
    frame.reset();

    let block = frame.cleared_frame_alloc(256, FrameAllocKind::Unknown);
    assert!(block.iter().all(|&b| b == 0));
}

#[test]
fn test_per_kind_accounting() {
    let mut frame = FrameData::new();
    frame.frame_alloc(64, FrameAllocKind::DrawSurf);
    frame.frame_alloc(64, FrameAllocKind::DrawSurf);
    frame.frame_alloc(64, FrameAllocKind::ViewDef);

    assert_eq!(frame.allocated_for(FrameAllocKind::DrawSurf), 2 * FRAME_ALLOC_ALIGNMENT);
    assert_eq!(frame.allocated_for(FrameAllocKind::ViewDef), FRAME_ALLOC_ALIGNMENT);
    assert_eq!(frame.allocated_for(FrameAllocKind::GuiSurface), 0);
}

#[test]
fn test_add_command_charges_arena() {
    let mut frame = FrameData::new();
    assert_eq!(frame.allocated(), 0);
    assert_eq!(frame.commands().len(), 1); // sentinel

    frame.add_command(RenderCommand::DrawView {
        view: Box::new(ViewDef::new_2d(ScreenRect::new(0, 0, 63, 63))),
        gui_only: true,
    });

    assert_eq!(frame.commands().len(), 2);
    assert!(frame.allocated() >= FRAME_ALLOC_ALIGNMENT);
    assert!(frame.allocated_for(FrameAllocKind::DrawCommand) > 0);
}

#[test]
fn test_take_commands_leaves_fresh_list() {
    let mut frame = FrameData::new();
    frame.add_command(RenderCommand::Nop);

    let closed = frame.take_commands();
    assert_eq!(closed.len(), 2);

    // a new list with just the sentinel is already open
    assert_eq!(frame.commands().len(), 1);
    assert!(!frame.commands().has_draw_view());
}

#[test]
fn test_reset_records_high_water() {
    let mut frame = FrameData::new();
    frame.frame_alloc(1024, FrameAllocKind::Unknown);
    let used = frame.allocated();

    frame.reset();
    assert_eq!(frame.allocated(), 0);
    assert_eq!(frame.high_water(), used);

    // a smaller frame does not lower the mark
    frame.frame_alloc(128, FrameAllocKind::Unknown);
    frame.reset();
    assert_eq!(frame.high_water(), used);
}
