use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::allocator::{get_allocator, set_allocator, DataPtr, RawAllocator};
use crate::memory::arena::{FrameNodeId, MemEvent, MemEventKind};
use crate::model::DeviceType;

fn current_frame() -> &'static Mutex<Option<FrameNodeId>> {
    static CURRENT_FRAME: OnceLock<Mutex<Option<FrameNodeId>>> = OnceLock::new();
    CURRENT_FRAME.get_or_init(|| Mutex::new(None))
}

/// Record which operator invocation is executing. The runtime interpreter
/// calls this around each node so traced allocations can be attributed.
pub fn set_current_frame(frame: Option<FrameNodeId>) {
    if let Ok(mut current) = current_frame().lock() {
        *current = frame;
    }
}

/// The operator invocation currently executing, if any
pub fn current_frame_id() -> Option<FrameNodeId> {
    current_frame().lock().ok().and_then(|current| current.clone())
}

/// Allocator interposed on a device during a profiling run. Every
/// allocation is delegated to the captured original allocator and
/// recorded as an `Allocate` event; dropping the returned pointer records
/// the matching `Free`. Timestamps come from a per-tracer event counter.
///
/// Single executor thread assumed; the event list is mutex-protected, but
/// the tracer must not be installed while another thread allocates on the
/// same device.
pub struct MemoryTracingAllocator {
    device: DeviceType,
    original: Arc<dyn RawAllocator>,
    events: Arc<Mutex<Vec<MemEvent>>>,
    clock: Arc<AtomicU64>,
}

impl MemoryTracingAllocator {
    pub fn new(device: DeviceType, original: Arc<dyn RawAllocator>) -> Self {
        Self {
            device,
            original,
            events: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Result<Vec<MemEvent>> {
        Ok(self
            .events
            .lock()
            .map_err(|_| Error::LockAcquisitionError("allocation trace".to_string()))?
            .clone())
    }

    fn take_events(&self) -> Result<Vec<MemEvent>> {
        Ok(std::mem::take(
            &mut *self
                .events
                .lock()
                .map_err(|_| Error::LockAcquisitionError("allocation trace".to_string()))?,
        ))
    }
}

impl RawAllocator for MemoryTracingAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        let original_ptr = self.original.allocate(nbytes)?;
        let frame = current_frame_id().ok_or_else(|| {
            Error::AllocationFailed(
                "traced allocation outside an executing operator frame".to_string(),
            )
        })?;

        let time = self.clock.fetch_add(1, Ordering::SeqCst);
        let addr = original_ptr.addr();
        let ptr_addr = original_ptr.addr_string();
        {
            let mut events = self
                .events
                .lock()
                .map_err(|_| Error::LockAcquisitionError("allocation trace".to_string()))?;
            events.push(MemEvent {
                time,
                pc: frame.time,
                backtrace: Backtrace::force_capture().to_string(),
                ptr_addr: ptr_addr.clone(),
                node_schema: frame.node_schema.clone(),
                node_header: frame.node_header.clone(),
                size: nbytes as u64,
                kind: MemEventKind::Allocate,
            });
        }

        // The wrapped pointer owns the original allocation; its drop
        // records the Free and then releases the underlying memory. The
        // frame is the one captured at allocation time, matching the
        // schema/header equality the trace extractor enforces.
        let events = Arc::clone(&self.events);
        let clock = Arc::clone(&self.clock);
        let pc = frame.time;
        let node_schema = frame.node_schema;
        let node_header = frame.node_header;
        let deleter = Box::new(move || {
            let time = clock.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut events) = events.lock() {
                events.push(MemEvent {
                    time,
                    pc,
                    backtrace: Backtrace::force_capture().to_string(),
                    ptr_addr,
                    node_schema,
                    node_header,
                    size: nbytes as u64,
                    kind: MemEventKind::Free,
                });
            }
            drop(original_ptr);
        });
        Ok(DataPtr::new(addr, nbytes, self.device, deleter))
    }

    fn device(&self) -> DeviceType {
        self.device
    }
}

/// Scoped profiling session. Installing the guard swaps the device's
/// allocator for a `MemoryTracingAllocator`; the original allocator is
/// restored when the guard is finished or dropped, on every exit path.
pub struct TracingAllocatorGuard {
    device: DeviceType,
    original: Arc<dyn RawAllocator>,
    tracer: Arc<MemoryTracingAllocator>,
    restored: bool,
}

impl TracingAllocatorGuard {
    /// Capture the device's current allocator and install the tracer in
    /// its place
    pub fn install(device: DeviceType) -> Result<Self> {
        let original = get_allocator(device)?;
        let tracer = Arc::new(MemoryTracingAllocator::new(device, Arc::clone(&original)));
        set_allocator(device, Arc::clone(&tracer) as Arc<dyn RawAllocator>)?;
        debug!(?device, "installed memory tracing allocator");
        Ok(Self {
            device,
            original,
            tracer,
            restored: false,
        })
    }

    /// Events recorded so far, without ending the session
    pub fn events(&self) -> Result<Vec<MemEvent>> {
        self.tracer.events()
    }

    /// End the session: restore the original allocator and hand back the
    /// recorded trace
    pub fn finish(mut self) -> Result<Vec<MemEvent>> {
        self.restore()?;
        self.tracer.take_events()
    }

    fn restore(&mut self) -> Result<()> {
        if !self.restored {
            set_allocator(self.device, Arc::clone(&self.original))?;
            self.restored = true;
            debug!(device = ?self.device, "restored original allocator");
        }
        Ok(())
    }
}

impl Drop for TracingAllocatorGuard {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
