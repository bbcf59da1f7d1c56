use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::model::DeviceType;

/// Alignment used for every raw allocation
const DEFAULT_ALIGNMENT: usize = 64;

/// An owned pointer into device memory. Carries the raw address, the
/// device it lives on, and a deleter invoked exactly once on drop.
pub struct DataPtr {
    addr: usize,
    size: usize,
    device: DeviceType,
    deleter: Option<Box<dyn FnOnce() + Send>>,
}

impl DataPtr {
    pub fn new(
        addr: usize,
        size: usize,
        device: DeviceType,
        deleter: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            addr,
            size,
            device,
            deleter: Some(deleter),
        }
    }

    /// Raw address of the allocation
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Address rendered the way traces record pointers
    pub fn addr_string(&self) -> String {
        format!("{:#x}", self.addr)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }
}

impl Drop for DataPtr {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter();
        }
    }
}

impl std::fmt::Debug for DataPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPtr")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &self.size)
            .field("device", &self.device)
            .finish()
    }
}

/// Raw device allocator. One is registered per device; the tracing
/// allocator replaces it for the duration of a profiling session.
pub trait RawAllocator: Send + Sync {
    /// Allocate `nbytes` of device memory
    fn allocate(&self, nbytes: usize) -> Result<DataPtr>;

    /// Device this allocator serves
    fn device(&self) -> DeviceType;
}

/// Host allocator backed by the Rust global allocator
pub struct SystemAllocator {
    device: DeviceType,
    allocated: AtomicUsize,
}

impl SystemAllocator {
    pub fn new(device: DeviceType) -> Self {
        Self {
            device,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Bytes currently outstanding
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl RawAllocator for SystemAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        let layout = Layout::from_size_align(nbytes.max(1), DEFAULT_ALIGNMENT)
            .map_err(|e| Error::AllocationFailed(format!("invalid layout: {}", e)))?;
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(Error::AllocationFailed(format!(
                "system allocator returned null for {} bytes",
                nbytes
            )));
        }
        self.allocated.fetch_add(nbytes, Ordering::Relaxed);

        let addr = ptr as usize;
        let deleter = Box::new(move || unsafe {
            alloc::dealloc(addr as *mut u8, layout);
        });
        Ok(DataPtr::new(addr, nbytes, self.device, deleter))
    }

    fn device(&self) -> DeviceType {
        self.device
    }
}

fn registry() -> &'static Mutex<HashMap<DeviceType, Arc<dyn RawAllocator>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<DeviceType, Arc<dyn RawAllocator>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The allocator currently registered for a device. Devices start out
/// with a `SystemAllocator`.
pub fn get_allocator(device: DeviceType) -> Result<Arc<dyn RawAllocator>> {
    let mut map = registry().lock().map_err(|_| {
        Error::LockAcquisitionError("device allocator registry".to_string())
    })?;
    Ok(map
        .entry(device)
        .or_insert_with(|| Arc::new(SystemAllocator::new(device)))
        .clone())
}

/// Replace the allocator for a device, returning the one it replaces
pub fn set_allocator(
    device: DeviceType,
    allocator: Arc<dyn RawAllocator>,
) -> Result<Arc<dyn RawAllocator>> {
    let mut map = registry().lock().map_err(|_| {
        Error::LockAcquisitionError("device allocator registry".to_string())
    })?;
    let previous = map
        .insert(device, allocator)
        .unwrap_or_else(|| Arc::new(SystemAllocator::new(device)));
    Ok(previous)
}
