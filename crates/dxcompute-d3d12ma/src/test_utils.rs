use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::com::HResult;
use crate::native::{
    AdapterHandle, AllocationDesc, DeviceHandle, NativeAllocation, NativeAllocator,
    NativeAllocatorLibrary, NativePool, NativeResource, ResourceDesc,
};

/// Every call the bridge made into the library, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeEvent {
    CreateAllocator(NativeAllocator),
    CreatePool(NativePool),
    CreateResource {
        allocation: NativeAllocation,
        resource: NativeResource,
        pool: Option<NativePool>,
        heap_type: crate::HeapType,
        width: u64,
    },
    ReleaseResource(NativeResource),
    ReleaseAllocation(NativeAllocation),
    ReleasePool(NativePool),
    ReleaseAllocator(NativeAllocator),
}

/// In-memory stand-in for the native allocator library.
///
/// Handles are unique non-zero integers. Failures can be injected for the next
/// `create_allocator` / `create_resource` call.
#[derive(Debug, Default)]
pub struct MockAllocatorLibrary {
    uma: bool,
    next_handle: AtomicUsize,
    events: Mutex<Vec<NativeEvent>>,
    fail_create_allocator: Mutex<Option<HResult>>,
    fail_create_resource: Mutex<Option<HResult>>,
}

impl MockAllocatorLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library that reports unified memory for every allocator.
    pub fn uma() -> Self {
        Self {
            uma: true,
            ..Self::default()
        }
    }

    pub fn fail_next_create_allocator(&self, hr: HResult) {
        *self
            .fail_create_allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hr);
    }

    pub fn fail_next_create_resource(&self, hr: HResult) {
        *self
            .fail_create_resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hr);
    }

    pub fn events(&self) -> Vec<NativeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Allocators created and not yet released.
    pub fn live_allocators(&self) -> usize {
        self.count(|e| matches!(e, NativeEvent::CreateAllocator(_)))
            - self.count(|e| matches!(e, NativeEvent::ReleaseAllocator(_)))
    }

    /// Resources created and not yet released.
    pub fn live_resources(&self) -> usize {
        self.count(|e| matches!(e, NativeEvent::CreateResource { .. }))
            - self.count(|e| matches!(e, NativeEvent::ReleaseResource(_)))
    }

    fn count(&self, f: impl Fn(&NativeEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| f(e))
            .count()
    }

    fn handle(&self) -> NonZeroUsize {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        NonZeroUsize::new(raw * 0x10).expect("handle counter overflowed")
    }

    fn record(&self, event: NativeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl NativeAllocatorLibrary for MockAllocatorLibrary {
    fn create_allocator(
        &self,
        _device: DeviceHandle,
        _adapter: AdapterHandle,
    ) -> Result<NativeAllocator, HResult> {
        if let Some(hr) = self
            .fail_create_allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(hr);
        }
        let allocator = NativeAllocator::new(self.handle());
        self.record(NativeEvent::CreateAllocator(allocator));
        Ok(allocator)
    }

    fn is_unified_memory(&self, _allocator: NativeAllocator) -> bool {
        self.uma
    }

    fn create_pool_for_unified_memory(
        &self,
        _allocator: NativeAllocator,
    ) -> Result<NativePool, HResult> {
        let pool = NativePool::new(self.handle());
        self.record(NativeEvent::CreatePool(pool));
        Ok(pool)
    }

    fn create_resource(
        &self,
        _allocator: NativeAllocator,
        pool: Option<NativePool>,
        allocation_desc: &AllocationDesc,
        resource_desc: &ResourceDesc,
    ) -> Result<(NativeAllocation, NativeResource), HResult> {
        if let Some(hr) = self
            .fail_create_resource
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(hr);
        }
        let allocation = NativeAllocation::new(self.handle());
        let resource = NativeResource::new(self.handle());
        self.record(NativeEvent::CreateResource {
            allocation,
            resource,
            pool,
            heap_type: allocation_desc.heap_type,
            width: resource_desc.width,
        });
        Ok((allocation, resource))
    }

    fn release_resource(&self, resource: NativeResource) {
        self.record(NativeEvent::ReleaseResource(resource));
    }

    fn release_allocation(&self, allocation: NativeAllocation) {
        self.record(NativeEvent::ReleaseAllocation(allocation));
    }

    fn release_pool(&self, pool: NativePool) {
        self.record(NativeEvent::ReleasePool(pool));
    }

    fn release_allocator(&self, allocator: NativeAllocator) {
        self.record(NativeEvent::ReleaseAllocator(allocator));
    }
}
