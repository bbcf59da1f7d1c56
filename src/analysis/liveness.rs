use std::collections::{HashMap, HashSet};

use crate::memory::arena::LiveRange;
use crate::model::Graph;

/// Values that stay alive for the whole execution: graph inputs (weights
/// and activations fed from outside), values with no producer node
/// (constants), and graph outputs. The planner never manages these.
pub fn always_alive_values(graph: &Graph) -> HashSet<String> {
    let mut alive: HashSet<String> = graph.inputs.iter().cloned().collect();
    alive.extend(graph.outputs.iter().cloned());

    let mut produced = HashSet::new();
    for node in &graph.nodes {
        for out in &node.outputs {
            produced.insert(out.as_str());
        }
    }
    for node in &graph.nodes {
        for input in &node.inputs {
            if !produced.contains(input.as_str()) {
                alive.insert(input.clone());
            }
        }
    }
    alive
}

/// Live range per value, in node execution indices. A value becomes live
/// at its producer and dies after its last consumer; values that are never
/// consumed die at their producer. Always-alive values are excluded.
pub fn liveness(graph: &Graph, always_alive: &HashSet<String>) -> HashMap<String, LiveRange> {
    let mut producer_idx: HashMap<&str, usize> = HashMap::new();
    let mut last_use_idx: HashMap<&str, usize> = HashMap::new();

    for (idx, node) in graph.nodes.iter().enumerate() {
        for out in &node.outputs {
            producer_idx.insert(out.as_str(), idx);
        }
        for input in &node.inputs {
            last_use_idx.insert(input.as_str(), idx);
        }
    }

    let mut ranges = HashMap::new();
    for (value, &begin) in &producer_idx {
        if always_alive.contains(*value) {
            continue;
        }
        let end = last_use_idx.get(value).copied().unwrap_or(begin).max(begin);
        ranges.insert(value.to_string(), LiveRange::new(begin as u64, end as u64));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> Graph {
        let mut graph = Graph::new("chain");
        graph.inputs.push("input".to_string());
        graph.add_node(
            "nn.conv2d",
            vec!["input".to_string(), "weight".to_string()],
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
        graph.outputs.push("pool_out".to_string());
        graph
    }

    #[test]
    fn test_always_alive_covers_inputs_outputs_and_constants() {
        let graph = chain_graph();
        let alive = always_alive_values(&graph);
        assert!(alive.contains("input"));
        // weight has no producer, so it is a constant
        assert!(alive.contains("weight"));
        assert!(alive.contains("pool_out"));
        assert!(!alive.contains("conv_out"));
    }

    #[test]
    fn test_liveness_spans_producer_to_last_use() {
        let graph = chain_graph();
        let alive = always_alive_values(&graph);
        let ranges = liveness(&graph, &alive);
        assert_eq!(ranges.get("conv_out"), Some(&LiveRange::new(0, 1)));
        assert_eq!(ranges.get("relu_out"), Some(&LiveRange::new(1, 2)));
        assert!(!ranges.contains_key("pool_out"));
    }

    #[test]
    fn test_unconsumed_value_dies_at_producer() {
        let mut graph = Graph::new("g");
        graph.add_node("nn.relu", vec!["x".to_string()], vec!["dead".to_string()]);
        let alive = always_alive_values(&graph);
        let ranges = liveness(&graph, &alive);
        assert_eq!(ranges.get("dead"), Some(&LiveRange::new(0, 0)));
    }
}
