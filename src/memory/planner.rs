use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::arena::{LiveRange, MemEvent, Region};
use crate::memory::liveness::extract_managed;
use crate::memory::materialize::{materialize_static_plan, materialize_trace_plan};
use crate::memory::packing::{
    greedy_by_operator_breadth, greedy_by_size, linear_scan, validate_plan,
};
use crate::memory::trace::{collect_live_ranges_per_node, extract_managed_from_trace};
use crate::model::Graph;
use crate::ops::registry::OperatorRegistry;

/// Packing heuristic selection. `Naive` leaves the graph untouched and
/// every allocation with the default allocator; `GreedyByBreadth` is only
/// valid for static planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Naive,
    LinearScan,
    GreedyBySize,
    GreedyByBreadth,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Naive => "naive",
            Strategy::LinearScan => "linear_scan",
            Strategy::GreedyBySize => "greedy_by_size",
            Strategy::GreedyByBreadth => "greedy_by_breadth",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "naive" => Ok(Strategy::Naive),
            "linear_scan" => Ok(Strategy::LinearScan),
            "greedy_by_size" => Ok(Strategy::GreedyBySize),
            "greedy_by_breadth" => Ok(Strategy::GreedyByBreadth),
            other => Err(Error::InvalidStrategy(format!(
                "unknown strategy {:?}",
                other
            ))),
        }
    }
}

/// Render a plan as one line per managed value, in begin-ascending order
pub fn format_allocations(
    allocations: &HashMap<LiveRange, Region>,
    managed_range_values: &BTreeMap<LiveRange, String>,
) -> String {
    let mut out = String::new();
    for (range, value) in managed_range_values {
        if let Some(region) = allocations.get(range) {
            out.push_str(&format!("{}: {} {}\n", value, range, region));
        }
    }
    out
}

/// Plan arena memory for a graph using static liveness, then rewrite the
/// graph with the resulting allocation nodes.
///
/// Soft failures (values whose size cannot be computed) are logged and
/// leaked to the default allocator; hard failures return an error with
/// the graph unmodified.
pub fn plan_memory(
    graph: &mut Graph,
    registry: &OperatorRegistry,
    strategy: Strategy,
) -> Result<()> {
    if strategy == Strategy::Naive {
        return Ok(());
    }

    let managed = extract_managed(graph, registry)?;

    // Deduplicate values sharing one live range up front; the plan is
    // keyed by range, so only one of them can be materialized.
    let mut ordered_values: Vec<(&String, &LiveRange)> = managed.ranges.iter().collect();
    ordered_values.sort_by(|a, b| a.0.cmp(b.0));
    let mut managed_range_values: BTreeMap<LiveRange, String> = BTreeMap::new();
    for (value, range) in ordered_values {
        if let Some(existing) = managed_range_values.get(range) {
            warn!(
                value = value.as_str(),
                existing = existing.as_str(),
                "overlapping live ranges"
            );
            continue;
        }
        managed_range_values.insert(*range, value.clone());
    }

    let mut managed_live_ranges: HashMap<LiveRange, u64> = HashMap::new();
    let mut value_sizes: HashMap<String, u64> = HashMap::new();
    let mut value_ranges: HashMap<String, LiveRange> = HashMap::new();
    for (range, value) in &managed_range_values {
        managed_live_ranges.insert(*range, managed.sizes[value]);
        value_sizes.insert(value.clone(), managed.sizes[value]);
        value_ranges.insert(value.clone(), *range);
    }

    let allocations = match strategy {
        Strategy::Naive => unreachable!("handled above"),
        Strategy::LinearScan => linear_scan(&managed_live_ranges),
        Strategy::GreedyBySize => greedy_by_size(&managed_live_ranges),
        Strategy::GreedyByBreadth => greedy_by_operator_breadth(
            graph,
            &value_sizes,
            &value_ranges,
            &managed.out_nodes,
        ),
    };
    validate_plan(&managed_live_ranges, &allocations)?;

    debug!(
        strategy = %strategy,
        "planned allocations:\n{}",
        format_allocations(&allocations, &managed_range_values)
    );

    materialize_static_plan(graph, &allocations, &managed_range_values)
}

/// Plan arena memory from a recorded allocation trace, then rewrite the
/// graph with preallocation nodes.
///
/// The trace must be complete and well formed; any inconsistency aborts
/// the plan with the graph unmodified. An empty trace is an error.
pub fn plan_memory_with_tracing(
    graph: &mut Graph,
    registry: &OperatorRegistry,
    strategy: Strategy,
    mem_events: &[MemEvent],
) -> Result<()> {
    if mem_events.is_empty() {
        return Err(Error::CorruptTrace(
            "no memory events were recorded".to_string(),
        ));
    }

    let (managed_live_ranges, live_range_node_header) =
        extract_managed_from_trace(mem_events)?;

    let allocations = match strategy {
        Strategy::Naive => return Ok(()),
        Strategy::LinearScan => linear_scan(&managed_live_ranges),
        Strategy::GreedyBySize => greedy_by_size(&managed_live_ranges),
        Strategy::GreedyByBreadth => {
            return Err(Error::InvalidStrategy(
                "greedy_by_breadth requires static planning".to_string(),
            ))
        }
    };
    validate_plan(&managed_live_ranges, &allocations)?;

    let collected_node_live_ranges = collect_live_ranges_per_node(live_range_node_header);
    debug!(
        strategy = %strategy,
        groups = collected_node_live_ranges.len(),
        "planned trace allocations"
    );

    materialize_trace_plan(graph, &allocations, &collected_node_live_ranges, registry)
}
