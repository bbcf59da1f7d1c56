use std::collections::HashMap;

use tracing::warn;

use crate::analysis;
use crate::error::Result;
use crate::memory::arena::LiveRange;
use crate::model::{Graph, NodeId, TensorTypeInfo};
use crate::ops::registry::OperatorRegistry;

/// Managed values extracted from a graph: the out-variant nodes in
/// execution order, the storage size of every value the planner will
/// place, and each such value's live range.
#[derive(Debug, Clone, Default)]
pub struct ManagedValues {
    pub out_nodes: Vec<NodeId>,
    pub sizes: HashMap<String, u64>,
    pub ranges: HashMap<String, LiveRange>,
}

/// Storage bytes a value needs, when its type carries enough information:
/// element count times element size. `None` means the planner must leave
/// the value to the default allocator.
pub fn compute_storage_size(value: &str, ttp: &TensorTypeInfo) -> Option<u64> {
    let data_type = match ttp.data_type {
        Some(dt) => dt,
        None => {
            warn!(value, "output was profiled but has no scalar type");
            return None;
        }
    };
    let numel = match ttp.numel() {
        Some(n) if n >= 0 => n as u64,
        _ => {
            warn!(value, "output was profiled but has no concrete sizes");
            return None;
        }
    };
    Some(numel * data_type.element_size())
}

/// Walk the graph and collect the values the planner manages.
///
/// A node is retained only if its operator has an out-variant; of those
/// nodes' outputs, always-alive values are skipped, tensor-list outputs
/// and values with unknown size are leaked with a warning, and the rest
/// become managed with their storage size. The returned ranges are the
/// liveness map restricted to the sized values.
pub fn extract_managed(graph: &Graph, registry: &OperatorRegistry) -> Result<ManagedValues> {
    let always_alive = analysis::always_alive_values(graph);
    let live_ranges = analysis::liveness(graph, &always_alive);

    let mut managed = ManagedValues::default();

    for node in &graph.nodes {
        if !registry.has_out_variant(node) {
            continue;
        }
        managed.out_nodes.push(node.id);

        for out_value in &node.outputs {
            if always_alive.contains(out_value) {
                continue;
            }
            let info = graph.value_types.get(out_value);
            if info.map_or(false, |t| t.is_tensor_list()) {
                // Structural container output; the default allocator owns it.
                continue;
            }
            let size = info
                .and_then(|t| t.as_tensor())
                .and_then(|ttp| compute_storage_size(out_value, ttp));
            match size {
                Some(size) if size > 0 => {
                    managed.sizes.insert(out_value.clone(), size);
                }
                _ => {
                    warn!(value = out_value.as_str(), "not handling unsupported value");
                }
            }
        }
    }

    for (value, range) in live_ranges {
        if managed.sizes.contains_key(&value) {
            managed.ranges.insert(value, range);
        }
    }

    Ok(managed)
}
