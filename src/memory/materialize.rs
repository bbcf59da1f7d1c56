use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::arena::{total_allocation_size, FrameNodeId, LiveRange, Region};
use crate::model::{Graph, NodeId, TensorTypeInfo};
use crate::ops::registry::OperatorRegistry;

/// Node kind reserving the arena at runtime
pub const ALLOCATE_STORAGE_OP: &str = "mem.allocate_storage";
/// Node kind handing out an arena slice for a statically planned value
pub const ALLOCATE_TENSOR_OP: &str = "mem.allocate_tensor";
/// Node kind handing out an arena slice for a trace-planned allocation
pub const PREALLOCATE_TENSOR_OP: &str = "mem.preallocate_tensor";

/// Concrete sizes and strides to stamp on an allocation node. Degenerate
/// shapes (absent, empty, or zero-led) collapse to `[0]`; absent or
/// degenerate strides fall back to the contiguous default for the sizes.
pub fn sizes_strides(ttp: &TensorTypeInfo) -> (Vec<i64>, Vec<i64>) {
    let sizes = match &ttp.sizes {
        Some(dims) if !dims.is_empty() && dims[0] != 0 => dims.clone(),
        _ => vec![0],
    };
    let strides = match &ttp.strides {
        Some(strides) if !strides.is_empty() && strides[0] != 0 => strides.clone(),
        _ => TensorTypeInfo::contiguous_strides(&sizes),
    };
    (sizes, strides)
}

/// Insert the arena-reserving storage node at the very front of the
/// graph, carrying the total size and the graph's dominant device.
/// Returns the new node's id.
pub fn insert_alloc_storage_node(graph: &mut Graph, total_size: u64) -> NodeId {
    let device = graph.dominant_device();
    let mut storage = graph.create_node(ALLOCATE_STORAGE_OP, vec![], vec![]);
    storage.outputs.push(format!("{}_out", storage.name));
    storage.set_int("total_size", total_size as i64);
    storage.set_int("device", device.to_attr());
    let id = storage.id;
    graph.insert_front(storage);
    id
}

struct TensorInsertion {
    producer: NodeId,
    value: String,
    region: Region,
    sizes: Vec<i64>,
    strides: Vec<i64>,
    dtype: i64,
}

/// Materialize a statically derived plan: one storage node up front, then
/// one `mem.allocate_tensor` per managed value, inserted immediately
/// before the value's producer in begin-ascending range order. The alloc
/// node's output is appended to the producer's inputs; the runtime
/// rewrites the op to its out-variant by schema match on the extended
/// argument list.
///
/// Resolution and validation run before any mutation, so an error leaves
/// the graph exactly as it was.
pub fn materialize_static_plan(
    graph: &mut Graph,
    allocations: &HashMap<LiveRange, Region>,
    managed_range_values: &BTreeMap<LiveRange, String>,
) -> Result<()> {
    let total_size = total_allocation_size(allocations);

    let mut insertions: Vec<TensorInsertion> = Vec::new();
    for (range, value) in managed_range_values {
        let region = *allocations.get(range).ok_or_else(|| {
            Error::PlanViolation(format!("live range {} has no placement", range))
        })?;
        if region.next_offset() > total_size {
            return Err(Error::PlanViolation(format!(
                "allocation for {} at {} exceeds planned arena of {} bytes",
                value, region, total_size
            )));
        }
        let producer = graph.producer(value).ok_or_else(|| {
            Error::InvalidGraph(format!("managed value {} has no producer node", value))
        })?;
        let ttp = graph.tensor_type(value).ok_or_else(|| {
            Error::InvalidGraph(format!("managed value {} has no tensor type", value))
        })?;
        let dtype = ttp.data_type.ok_or_else(|| {
            Error::InvalidGraph(format!("managed value {} has no scalar type", value))
        })?;
        let (sizes, strides) = sizes_strides(ttp);
        insertions.push(TensorInsertion {
            producer: producer.id,
            value: value.clone(),
            region,
            sizes,
            strides,
            dtype: dtype.to_attr(),
        });
    }

    let storage = insert_alloc_storage_node(graph, total_size);
    let storage_out = graph
        .node(storage)
        .map(|n| n.outputs[0].clone())
        .unwrap_or_default();
    let device = graph.node(storage).and_then(|n| n.int("device")).unwrap_or(0);

    for insertion in insertions {
        let mut alloc = graph.create_node(
            ALLOCATE_TENSOR_OP,
            vec![storage_out.clone()],
            vec![],
        );
        alloc.outputs.push(format!("{}_out", alloc.name));
        let alloc_out = alloc.outputs[0].clone();
        alloc.set_int("size", insertion.region.size as i64);
        alloc.set_int("offset", insertion.region.offset as i64);
        alloc.set_ints("sizes", insertion.sizes);
        alloc.set_ints("stride", insertion.strides);
        alloc.set_int("device", device);
        alloc.set_int("dtype", insertion.dtype);
        debug!(value = insertion.value.as_str(), "inserting allocation op");
        graph.insert_before(insertion.producer, alloc)?;
        graph.add_input(insertion.producer, &alloc_out)?;
    }
    Ok(())
}

/// Materialize a trace-derived plan: a storage node up front and one
/// `mem.preallocate_tensor` per recorded allocation, inserted before the
/// graph node whose canonical schema matches the frame's header. Groups
/// are visited in frame-time order with a single forward cursor; ranges
/// inside a group go in begin order.
pub fn materialize_trace_plan(
    graph: &mut Graph,
    allocations: &HashMap<LiveRange, Region>,
    collected_node_live_ranges: &[(FrameNodeId, Vec<LiveRange>)],
    registry: &OperatorRegistry,
) -> Result<()> {
    let total_size = total_allocation_size(allocations);

    // Resolve every insertion anchor against the unmodified graph before
    // touching it.
    let headers: Vec<(NodeId, String)> = graph
        .nodes
        .iter()
        .map(|node| (node.id, registry.node_header(node)))
        .collect();

    let mut insertions: Vec<(NodeId, Region)> = Vec::new();
    let mut cursor = 0usize;
    for (frame, ranges) in collected_node_live_ranges {
        while cursor < headers.len() && headers[cursor].1 != frame.node_header {
            cursor += 1;
        }
        if cursor == headers.len() {
            return Err(Error::InvalidGraph(format!(
                "no graph node matches traced operator {}",
                frame.node_header
            )));
        }
        let anchor = headers[cursor].0;
        for range in ranges {
            let region = *allocations.get(range).ok_or_else(|| {
                Error::PlanViolation(format!("live range {} has no placement", range))
            })?;
            if region.next_offset() > total_size {
                return Err(Error::PlanViolation(format!(
                    "allocation for {} at {} exceeds planned arena of {} bytes",
                    frame.node_header, region, total_size
                )));
            }
            insertions.push((anchor, region));
        }
    }

    insert_alloc_storage_node(graph, total_size);

    for (anchor, region) in insertions {
        let mut alloc = graph.create_node(PREALLOCATE_TENSOR_OP, vec![], vec![]);
        alloc.set_int("size", region.size as i64);
        alloc.set_int("offset", region.offset as i64);
        debug!(size = region.size, offset = region.offset, "inserting preallocation op");
        graph.insert_before(anchor, alloc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;

    #[test]
    fn test_sizes_strides_defaults() {
        let ttp = TensorTypeInfo::new(DataType::Float, vec![2, 3]);
        assert_eq!(sizes_strides(&ttp), (vec![2, 3], vec![3, 1]));

        let mut degenerate = TensorTypeInfo::new(DataType::Float, vec![]);
        degenerate.sizes = Some(vec![]);
        assert_eq!(sizes_strides(&degenerate), (vec![0], vec![1]));

        let mut explicit = TensorTypeInfo::new(DataType::Float, vec![2, 3]);
        explicit.strides = Some(vec![1, 2]);
        assert_eq!(sizes_strides(&explicit), (vec![2, 3], vec![1, 2]));
    }

    #[test]
    fn test_storage_node_lands_at_front() {
        let mut graph = Graph::new("g");
        graph.add_node("nn.relu", vec!["x".to_string()], vec!["y".to_string()]);
        let storage = insert_alloc_storage_node(&mut graph, 512);
        assert_eq!(graph.nodes[0].id, storage);
        assert_eq!(graph.nodes[0].int("total_size"), Some(512));
        assert!(graph.nodes[0].int("device").is_some());
    }
}
