pub mod allocator;
pub mod arena;
pub mod liveness;
pub mod materialize;
pub mod packing;
pub mod planner;
pub mod trace;
pub mod tracing;

pub use allocator::{get_allocator, set_allocator, DataPtr, RawAllocator, SystemAllocator};
pub use arena::{
    frame_node_id_cmp, live_range_start_cmp, total_allocation_size, FrameNodeId, LiveRange,
    MemEvent, MemEventKind, Region,
};
pub use liveness::{compute_storage_size, extract_managed, ManagedValues};
pub use materialize::{
    insert_alloc_storage_node, materialize_static_plan, materialize_trace_plan,
    ALLOCATE_STORAGE_OP, ALLOCATE_TENSOR_OP, PREALLOCATE_TENSOR_OP,
};
pub use packing::{greedy_by_operator_breadth, greedy_by_size, linear_scan, validate_plan};
pub use planner::{format_allocations, plan_memory, plan_memory_with_tracing, Strategy};
pub use trace::{
    collect_live_ranges_per_node, extract_managed_from_trace, load_events, save_events,
};
pub use self::tracing::{
    current_frame_id, set_current_frame, MemoryTracingAllocator, TracingAllocatorGuard,
};
