use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};
use crate::memory::arena::{
    frame_node_id_cmp, live_range_start_cmp, FrameNodeId, LiveRange, MemEvent, MemEventKind,
};

/// Live ranges recovered from a recorded allocation trace: sizes keyed by
/// range, and each range paired with the frame that allocated it.
pub type TraceLiveRanges = (HashMap<LiveRange, u64>, Vec<(LiveRange, FrameNodeId)>);

/// Sweep a chronologically ordered event list once, pairing every
/// `Allocate` with its `Free` by pointer address.
///
/// Any unpaired or mismatched event means the trace is corrupt and the
/// whole plan is abandoned: a `Free` with no open allocation, a size or
/// schema/header mismatch between the pair, a free not strictly after its
/// allocation, or allocations still open when the sweep ends.
pub fn extract_managed_from_trace(events: &[MemEvent]) -> Result<TraceLiveRanges> {
    let mut managed_live_ranges: HashMap<LiveRange, u64> = HashMap::new();
    let mut live_range_node_header: Vec<(LiveRange, FrameNodeId)> = Vec::new();

    let mut open_allocs: HashMap<&str, &MemEvent> = HashMap::new();
    for event in events {
        match event.kind {
            MemEventKind::Allocate => {
                open_allocs.insert(event.ptr_addr.as_str(), event);
            }
            MemEventKind::Free => {
                let alloc = open_allocs.remove(event.ptr_addr.as_str()).ok_or_else(|| {
                    Error::CorruptTrace(format!(
                        "free of {} without a matching allocation",
                        event.ptr_addr
                    ))
                })?;
                if alloc.size != event.size {
                    return Err(Error::CorruptTrace(format!(
                        "free of {} with size {} but allocation had size {}",
                        event.ptr_addr, event.size, alloc.size
                    )));
                }
                if alloc.time >= event.time {
                    return Err(Error::CorruptTrace(format!(
                        "free of {} at time {} does not follow its allocation at time {}",
                        event.ptr_addr, event.time, alloc.time
                    )));
                }
                if alloc.node_schema != event.node_schema || alloc.node_header != event.node_header {
                    return Err(Error::CorruptTrace(format!(
                        "free of {} records operator {} but allocation came from {}",
                        event.ptr_addr, event.node_header, alloc.node_header
                    )));
                }

                let range = LiveRange::new(alloc.time, event.time);
                managed_live_ranges.insert(range, alloc.size);
                live_range_node_header.push((
                    range,
                    FrameNodeId {
                        time: alloc.time,
                        node_schema: alloc.node_schema.clone(),
                        node_header: alloc.node_header.clone(),
                    },
                ));
            }
        }
    }

    if !open_allocs.is_empty() {
        let mut leaked: Vec<&str> = open_allocs.keys().copied().collect();
        leaked.sort_unstable();
        return Err(Error::CorruptTrace(format!(
            "{} allocation(s) never freed: {}",
            leaked.len(),
            leaked.join(", ")
        )));
    }

    Ok((managed_live_ranges, live_range_node_header))
}

/// Group trace live ranges by the frame that allocated them. Groups come
/// back sorted by frame time, and the ranges inside each group by begin.
pub fn collect_live_ranges_per_node(
    live_range_node_header: Vec<(LiveRange, FrameNodeId)>,
) -> Vec<(FrameNodeId, Vec<LiveRange>)> {
    let mut node_live_ranges: HashMap<FrameNodeId, Vec<LiveRange>> = HashMap::new();
    for (range, frame) in live_range_node_header {
        node_live_ranges.entry(frame).or_default().push(range);
    }

    let mut collected: Vec<(FrameNodeId, Vec<LiveRange>)> = node_live_ranges
        .into_iter()
        .map(|(frame, mut ranges)| {
            ranges.sort_by(live_range_start_cmp);
            (frame, ranges)
        })
        .collect();
    collected.sort_by(|a, b| frame_node_id_cmp(&a.0, &b.0));
    collected
}

/// Write a recorded trace as JSON, so profiling and planning can run in
/// different processes
pub fn save_events<P: AsRef<Path>>(path: P, events: &[MemEvent]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), events)?;
    Ok(())
}

/// Load a trace previously written by `save_events`
pub fn load_events<P: AsRef<Path>>(path: P) -> Result<Vec<MemEvent>> {
    let file = File::open(path)?;
    let events = serde_json::from_reader(BufReader::new(file))?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(
        time: u64,
        ptr: &str,
        size: u64,
        kind: MemEventKind,
        header: &str,
    ) -> MemEvent {
        MemEvent {
            time,
            pc: time,
            backtrace: String::new(),
            ptr_addr: ptr.to_string(),
            node_schema: header.split('(').next().unwrap_or("").to_string(),
            node_header: header.to_string(),
            size,
            kind,
        }
    }

    #[test]
    fn test_paired_events_become_ranges() {
        let header = "nn.relu(Tensor input) -> Tensor";
        let events = vec![
            event(1, "0x10", 16, MemEventKind::Allocate, header),
            event(2, "0x20", 8, MemEventKind::Allocate, header),
            event(5, "0x20", 8, MemEventKind::Free, header),
            event(9, "0x10", 16, MemEventKind::Free, header),
        ];
        let (ranges, frames) = extract_managed_from_trace(&events).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges.get(&LiveRange::new(1, 9)), Some(&16));
        assert_eq!(ranges.get(&LiveRange::new(2, 5)), Some(&8));
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_size_mismatch_is_corrupt() {
        let header = "nn.relu(Tensor input) -> Tensor";
        let events = vec![
            event(1, "0x10", 16, MemEventKind::Allocate, header),
            event(5, "0x10", 8, MemEventKind::Free, header),
        ];
        assert!(matches!(
            extract_managed_from_trace(&events),
            Err(Error::CorruptTrace(_))
        ));
    }

    #[test]
    fn test_unmatched_free_is_corrupt() {
        let header = "nn.relu(Tensor input) -> Tensor";
        let events = vec![event(5, "0x10", 8, MemEventKind::Free, header)];
        assert!(matches!(
            extract_managed_from_trace(&events),
            Err(Error::CorruptTrace(_))
        ));
    }

    #[test]
    fn test_unfreed_allocation_is_corrupt() {
        let header = "nn.relu(Tensor input) -> Tensor";
        let events = vec![event(1, "0x10", 8, MemEventKind::Allocate, header)];
        assert!(matches!(
            extract_managed_from_trace(&events),
            Err(Error::CorruptTrace(_))
        ));
    }

    #[test]
    fn test_header_mismatch_is_corrupt() {
        let events = vec![
            event(1, "0x10", 8, MemEventKind::Allocate, "nn.relu(Tensor input) -> Tensor"),
            event(5, "0x10", 8, MemEventKind::Free, "nn.conv2d(Tensor input) -> Tensor"),
        ];
        assert!(matches!(
            extract_managed_from_trace(&events),
            Err(Error::CorruptTrace(_))
        ));
    }

    #[test]
    fn test_grouping_sorts_frames_and_ranges() {
        let frame = |time: u64, header: &str| FrameNodeId {
            time,
            node_schema: header.to_string(),
            node_header: header.to_string(),
        };
        let pairs = vec![
            (LiveRange::new(7, 9), frame(7, "b")),
            (LiveRange::new(1, 4), frame(1, "a")),
            (LiveRange::new(1, 2), frame(1, "a")),
        ];
        let collected = collect_live_ranges_per_node(pairs);
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].0.time, 1);
        assert_eq!(
            collected[0].1,
            vec![LiveRange::new(1, 2), LiveRange::new(1, 4)]
        );
        assert_eq!(collected[1].0.time, 7);
    }
}
