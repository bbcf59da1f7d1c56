//! Plan arena memory for a small convolutional graph with each strategy
//! and print the resulting graphs.

use anyhow::Result;

use memplan::memory::materialize::{ALLOCATE_STORAGE_OP, ALLOCATE_TENSOR_OP};
use memplan::memory::{plan_memory, Strategy};
use memplan::model::{DataType, Graph, TensorTypeInfo, TypeInfo};
use memplan::ops::OperatorRegistry;

fn build_graph() -> Graph {
    let mut graph = Graph::new("demo");
    graph.inputs = vec![
        "input".to_string(),
        "conv_weight".to_string(),
        "fc_weight".to_string(),
    ];
    graph.add_node(
        "nn.conv2d",
        vec!["input".to_string(), "conv_weight".to_string()],
        vec!["conv_out".to_string()],
    );
    graph.add_node(
        "nn.relu",
        vec!["conv_out".to_string()],
        vec!["relu_out".to_string()],
    );
    graph.add_node(
        "nn.max_pool2d",
        vec!["relu_out".to_string()],
        vec!["pool_out".to_string()],
    );
    graph.add_node(
        "math.matmul",
        vec!["pool_out".to_string(), "fc_weight".to_string()],
        vec!["logits".to_string()],
    );
    graph.outputs = vec!["logits".to_string()];

    graph.set_value_type(
        "conv_out",
        TypeInfo::Tensor(TensorTypeInfo::new(DataType::Float, vec![1, 16, 28, 28])),
    );
    graph.set_value_type(
        "relu_out",
        TypeInfo::Tensor(TensorTypeInfo::new(DataType::Float, vec![1, 16, 28, 28])),
    );
    graph.set_value_type(
        "pool_out",
        TypeInfo::Tensor(TensorTypeInfo::new(DataType::Float, vec![1, 16, 14, 14])),
    );
    graph.set_value_type(
        "logits",
        TypeInfo::Tensor(TensorTypeInfo::new(DataType::Float, vec![1, 10])),
    );
    graph
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let registry = OperatorRegistry::with_standard_operators();

    for strategy in [
        Strategy::Naive,
        Strategy::LinearScan,
        Strategy::GreedyBySize,
        Strategy::GreedyByBreadth,
    ] {
        let mut graph = build_graph();
        plan_memory(&mut graph, &registry, strategy)?;

        println!("== {} ==", strategy);
        let storage = graph.nodes.iter().find(|n| n.op_type == ALLOCATE_STORAGE_OP);
        match storage {
            Some(node) => println!(
                "arena: {} bytes on device {}",
                node.int("total_size").unwrap_or(0),
                node.int("device").unwrap_or(0)
            ),
            None => println!("arena: none (default allocator)"),
        }
        for node in &graph.nodes {
            if node.op_type == ALLOCATE_TENSOR_OP {
                println!(
                    "  {} -> offset {} size {}",
                    node.outputs[0],
                    node.int("offset").unwrap_or(0),
                    node.int("size").unwrap_or(0)
                );
            }
        }
        println!();
    }
    Ok(())
}
