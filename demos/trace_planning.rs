//! Profile a mock execution with the tracing allocator, then plan memory
//! from the recorded trace.

use std::collections::HashMap;

use anyhow::Result;

use memplan::memory::materialize::PREALLOCATE_TENSOR_OP;
use memplan::memory::tracing::{set_current_frame, TracingAllocatorGuard};
use memplan::memory::{get_allocator, plan_memory_with_tracing, DataPtr, FrameNodeId, Strategy};
use memplan::model::{DeviceType, Graph};
use memplan::ops::OperatorRegistry;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let registry = OperatorRegistry::with_standard_operators();

    let mut graph = Graph::new("traced_demo");
    graph.inputs = vec!["x".to_string(), "w".to_string()];
    graph.add_node(
        "nn.conv2d",
        vec!["x".to_string(), "w".to_string()],
        vec!["c".to_string()],
    );
    graph.add_node("nn.relu", vec!["c".to_string()], vec!["r".to_string()]);
    graph.add_node(
        "nn.max_pool2d",
        vec!["r".to_string()],
        vec!["y".to_string()],
    );
    graph.outputs = vec!["y".to_string()];

    let output_sizes: HashMap<&str, usize> =
        [("c", 4096), ("r", 4096), ("y", 1024)].into_iter().collect();

    // Profiling run: the "interpreter" walks the graph, announcing each
    // frame and allocating operator outputs through the traced device.
    let guard = TracingAllocatorGuard::install(DeviceType::Cpu)?;
    let mut live: HashMap<String, DataPtr> = HashMap::new();
    let nodes = graph.nodes.clone();
    for (idx, node) in nodes.iter().enumerate() {
        set_current_frame(Some(FrameNodeId {
            time: idx as u64,
            node_schema: node.op_type.clone(),
            node_header: registry.node_header(node),
        }));
        for out in &node.outputs {
            let ptr = get_allocator(DeviceType::Cpu)?.allocate(output_sizes[out.as_str()])?;
            live.insert(out.clone(), ptr);
        }
        for input in &node.inputs {
            let is_last_use = !nodes[idx + 1..]
                .iter()
                .any(|later| later.inputs.contains(input));
            if is_last_use {
                live.remove(input);
            }
        }
    }
    live.clear();
    set_current_frame(None);
    let events = guard.finish()?;
    println!("recorded {} memory events", events.len());

    plan_memory_with_tracing(&mut graph, &registry, Strategy::GreedyBySize, &events)?;

    println!("arena: {} bytes", graph.nodes[0].int("total_size").unwrap_or(0));
    for node in &graph.nodes {
        if node.op_type == PREALLOCATE_TENSOR_OP {
            println!(
                "  preallocation at offset {} size {}",
                node.int("offset").unwrap_or(0),
                node.int("size").unwrap_or(0)
            );
        }
    }
    Ok(())
}
