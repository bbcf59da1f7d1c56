pub mod analysis;
pub mod error;
pub mod memory;
pub mod model;
pub mod ops;

// Re-export commonly used types
pub use error::{Error, Result};
pub use memory::{
    plan_memory, plan_memory_with_tracing, total_allocation_size, FrameNodeId, LiveRange,
    MemEvent, MemEventKind, Region, Strategy, TracingAllocatorGuard,
};
pub use model::{DataType, DeviceType, Graph, Node, NodeId, TensorTypeInfo, TypeInfo};
pub use ops::{OpSchema, OperatorRegistry};
