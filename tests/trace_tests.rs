use memplan::memory::trace::{
    collect_live_ranges_per_node, extract_managed_from_trace, load_events, save_events,
};
use memplan::memory::{LiveRange, MemEvent, MemEventKind};
use memplan::Error;

fn event(time: u64, ptr: &str, size: u64, kind: MemEventKind, header: &str) -> MemEvent {
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

const RELU: &str = "nn.relu(Tensor input) -> Tensor";
const CONV: &str = "nn.conv2d(Tensor input, Tensor weight) -> Tensor";

#[test]
fn test_trace_round_trip_yields_one_range_per_pair() {
    let events = vec![
        event(1, "0xa0", 16, MemEventKind::Allocate, CONV),
        event(2, "0xb0", 8, MemEventKind::Allocate, RELU),
        event(5, "0xb0", 8, MemEventKind::Free, RELU),
        event(9, "0xa0", 16, MemEventKind::Free, CONV),
    ];
    let (ranges, pairs) = extract_managed_from_trace(&events).unwrap();

    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[&LiveRange::new(1, 9)], 16);
    assert_eq!(ranges[&LiveRange::new(2, 5)], 8);

    let collected = collect_live_ranges_per_node(pairs);
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].0.node_header, CONV);
    assert_eq!(collected[0].1, vec![LiveRange::new(1, 9)]);
    assert_eq!(collected[1].0.node_header, RELU);
}

#[test]
fn test_pointer_reuse_produces_separate_ranges() {
    let events = vec![
        event(1, "0xa0", 32, MemEventKind::Allocate, RELU),
        event(2, "0xa0", 32, MemEventKind::Free, RELU),
        event(3, "0xa0", 64, MemEventKind::Allocate, RELU),
        event(7, "0xa0", 64, MemEventKind::Free, RELU),
    ];
    let (ranges, _) = extract_managed_from_trace(&events).unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[&LiveRange::new(1, 2)], 32);
    assert_eq!(ranges[&LiveRange::new(3, 7)], 64);
}

#[test]
fn test_size_mismatch_aborts_the_plan() {
    let events = vec![
        event(1, "0xa0", 16, MemEventKind::Allocate, RELU),
        event(5, "0xa0", 8, MemEventKind::Free, RELU),
    ];
    assert!(matches!(
        extract_managed_from_trace(&events),
        Err(Error::CorruptTrace(_))
    ));
}

#[test]
fn test_free_before_allocate_time_aborts_the_plan() {
    let events = vec![
        event(5, "0xa0", 16, MemEventKind::Allocate, RELU),
        event(5, "0xa0", 16, MemEventKind::Free, RELU),
    ];
    assert!(matches!(
        extract_managed_from_trace(&events),
        Err(Error::CorruptTrace(_))
    ));
}

#[test]
fn test_events_survive_a_json_round_trip() {
    let events = vec![
        event(1, "0xa0", 16, MemEventKind::Allocate, CONV),
        event(9, "0xa0", 16, MemEventKind::Free, CONV),
    ];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.json");

    save_events(&path, &events).unwrap();
    let loaded = load_events(&path).unwrap();
    assert_eq!(loaded, events);

    let (ranges, _) = extract_managed_from_trace(&loaded).unwrap();
    assert_eq!(ranges[&LiveRange::new(1, 9)], 16);
}

#[test]
fn test_loading_a_missing_trace_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert!(matches!(load_events(&missing), Err(Error::IoError(_))));
}
