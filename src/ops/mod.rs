pub mod registry;

pub use registry::{FormalParameter, OpSchema, OperatorRegistry};
