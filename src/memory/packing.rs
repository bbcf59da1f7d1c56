//! Packing heuristics for the interval-to-offset assignment problem.
//!
//! Each strategy takes the managed live ranges with their byte sizes and
//! returns a plan mapping every range to a region inside the arena, such
//! that ranges which overlap in time never share bytes. The underlying
//! 2-D strip-packing problem is NP-hard; these are deliberately cheap
//! heuristics, not optimal solvers.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::memory::arena::{live_range_start_cmp, LiveRange, Region};
use crate::model::{Graph, NodeId};

/// Lowest non-negative offset at which a `size`-byte block avoids every
/// region in `occupied`. Scans the occupied regions in ascending offset
/// order and takes the first gap large enough, falling back to the high
/// water mark past the last occupied byte.
fn lowest_fit(size: u64, occupied: &mut Vec<Region>) -> u64 {
    occupied.sort_unstable_by_key(|region| (region.offset, region.size));
    let mut candidate = 0u64;
    for region in occupied.iter() {
        if candidate + size <= region.offset {
            break;
        }
        candidate = candidate.max(region.next_offset());
    }
    candidate
}

/// Linear-scan packing.
///
/// Sweeps ranges in begin-ascending order keeping an active set of
/// currently live placements. Before placing a range, every active range
/// that ended strictly before it begins is evicted, freeing its offset
/// window; the range then takes the lowest offset that fits among the
/// survivors. Earlier ranges win lower offsets.
pub fn linear_scan(managed_live_ranges: &HashMap<LiveRange, u64>) -> HashMap<LiveRange, Region> {
    let mut order: Vec<(LiveRange, u64)> =
        managed_live_ranges.iter().map(|(r, s)| (*r, *s)).collect();
    order.sort_by(|a, b| live_range_start_cmp(&a.0, &b.0));

    let mut allocations: HashMap<LiveRange, Region> = HashMap::new();
    let mut active: Vec<LiveRange> = Vec::new();

    for (range, size) in order {
        active.retain(|live| live.end >= range.begin);

        let mut occupied: Vec<Region> = active.iter().map(|live| allocations[live]).collect();
        let offset = lowest_fit(size, &mut occupied);

        allocations.insert(range, Region::new(offset, size));
        active.push(range);
    }
    allocations
}

/// Greedy packing, largest tensor first.
///
/// Sorts ranges by descending size (ties by ascending begin, then end)
/// and places each at the lowest offset that avoids the already-placed
/// ranges it overlaps in time. Large tensors claim their offsets first
/// and small ones fill the gaps, which packs tighter than linear scan on
/// most workloads.
pub fn greedy_by_size(managed_live_ranges: &HashMap<LiveRange, u64>) -> HashMap<LiveRange, Region> {
    let mut order: Vec<(LiveRange, u64)> =
        managed_live_ranges.iter().map(|(r, s)| (*r, *s)).collect();
    order.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(a.0.begin.cmp(&b.0.begin))
            .then(a.0.end.cmp(&b.0.end))
    });

    let mut allocations: HashMap<LiveRange, Region> = HashMap::new();
    for (range, size) in order {
        let offset = place_against(&range, size, &allocations);
        allocations.insert(range, Region::new(offset, size));
    }
    allocations
}

/// Lowest offset for `range` that avoids every already-placed range
/// overlapping it in time
fn place_against(
    range: &LiveRange,
    size: u64,
    allocations: &HashMap<LiveRange, Region>,
) -> u64 {
    let mut occupied: Vec<Region> = allocations
        .iter()
        .filter(|(placed, _)| placed.overlaps(range))
        .map(|(_, region)| *region)
        .collect();
    lowest_fit(size, &mut occupied)
}

/// Schedule-aware greedy packing.
///
/// The breadth of an operator is the total size of all managed values
/// live at its timestamp. Operators are visited in descending breadth so
/// placement happens around the peak working set first; each operator's
/// outputs are then placed in graph order by the same lowest-offset rule
/// as `greedy_by_size`. Only valid for statically planned graphs, where
/// managed values are keyed by name.
pub fn greedy_by_operator_breadth(
    graph: &Graph,
    managed_value_sizes: &HashMap<String, u64>,
    managed_value_ranges: &HashMap<String, LiveRange>,
    out_nodes: &[NodeId],
) -> HashMap<LiveRange, Region> {
    let breadth_of = |node_id: NodeId| -> u64 {
        let t = match graph.node_index(node_id) {
            Some(idx) => idx as u64,
            None => return 0,
        };
        managed_value_sizes
            .iter()
            .filter(|(value, _)| {
                managed_value_ranges
                    .get(*value)
                    .map_or(false, |range| range.contains(t))
            })
            .map(|(_, size)| *size)
            .sum()
    };

    let mut ordered: Vec<NodeId> = out_nodes.to_vec();
    ordered.sort_by_key(|id| std::cmp::Reverse(breadth_of(*id)));

    let mut allocations: HashMap<LiveRange, Region> = HashMap::new();
    for node_id in ordered {
        let node = match graph.node(node_id) {
            Some(node) => node,
            None => continue,
        };
        for out_value in &node.outputs {
            let (range, size) = match (
                managed_value_ranges.get(out_value),
                managed_value_sizes.get(out_value),
            ) {
                (Some(range), Some(size)) => (*range, *size),
                _ => continue,
            };
            if allocations.contains_key(&range) {
                continue;
            }
            let offset = place_against(&range, size, &allocations);
            allocations.insert(range, Region::new(offset, size));
        }
    }
    allocations
}

/// Check the packing contract every strategy must satisfy: each input
/// range is placed with its exact size, and ranges that overlap in time
/// occupy disjoint regions.
pub fn validate_plan(
    managed_live_ranges: &HashMap<LiveRange, u64>,
    allocations: &HashMap<LiveRange, Region>,
) -> Result<()> {
    for (range, size) in managed_live_ranges {
        let region = allocations.get(range).ok_or_else(|| {
            Error::PlanViolation(format!("live range {} was never placed", range))
        })?;
        if region.size != *size {
            return Err(Error::PlanViolation(format!(
                "live range {} placed with size {} instead of {}",
                range, region.size, size
            )));
        }
    }

    let entries: Vec<(&LiveRange, &Region)> = allocations.iter().collect();
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let (r1, reg1) = entries[i];
            let (r2, reg2) = entries[j];
            if r1.overlaps(r2) && reg1.collides(reg2) {
                return Err(Error::PlanViolation(format!(
                    "overlapping live ranges {} and {} share bytes: {} vs {}",
                    r1, r2, reg1, reg2
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_fit_takes_first_gap() {
        let mut occupied = vec![Region::new(0, 10), Region::new(30, 10)];
        assert_eq!(lowest_fit(20, &mut occupied), 10);
        assert_eq!(lowest_fit(25, &mut occupied), 40);
        let mut empty = Vec::new();
        assert_eq!(lowest_fit(100, &mut empty), 0);
    }

    #[test]
    fn test_lowest_fit_ignores_order_of_occupied() {
        let mut occupied = vec![Region::new(60, 30), Region::new(0, 60)];
        assert_eq!(lowest_fit(10, &mut occupied), 90);
    }
}
