pub mod liveness;

pub use liveness::{always_alive_values, liveness};
