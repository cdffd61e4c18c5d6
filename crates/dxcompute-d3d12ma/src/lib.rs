//! Reference-counted bridge to a D3D12MA-style native memory allocator.
//!
//! The bridge exposes three COM-compatible objects (`IAllocatorFactory`, `IAllocator`,
//! `IAllocation`) over an external [`NativeAllocatorLibrary`], plus safe wrappers for Rust
//! callers. Lifetimes are enforced by reference counts:
//! - an allocation holds a strong reference to its allocator until after its native resource and
//!   allocation have been released;
//! - an allocator releases its UMA pool before the native allocator.

pub mod com;
pub mod native;
mod objects;

/// Mock native allocator library for tests.
///
/// Only available when compiling this crate's own tests, or when the `test-utils` feature is
/// enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use thiserror::Error;

pub use com::{ComPtr, Guid, HResult, IUnknown, Interface};
pub use native::{
    AdapterHandle, AllocationDesc, DeviceHandle, HeapType, NativeAllocation, NativeAllocator,
    NativeAllocatorLibrary, NativePool, NativeResource, ResourceDesc,
    RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
};
pub use objects::{
    IAllocation, IAllocationVtbl, IAllocator, IAllocatorFactory, IAllocatorFactoryVtbl,
    IAllocatorVtbl, IID_IALLOCATION, IID_IALLOCATOR, IID_IALLOCATOR_FACTORY,
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("object does not implement the requested interface")]
    NoInterface,
    #[error("out of memory")]
    OutOfMemory,
    #[error("null pointer passed across the bridge")]
    NullPointer,
    #[error("native allocator call failed: {0}")]
    Native(HResult),
}

impl BridgeError {
    /// The `HRESULT` this error was created from.
    pub fn hresult(self) -> HResult {
        match self {
            Self::NoInterface => HResult::E_NOINTERFACE,
            Self::OutOfMemory => HResult::E_OUTOFMEMORY,
            Self::NullPointer => HResult::E_POINTER,
            Self::Native(hr) => hr,
        }
    }
}

impl From<HResult> for BridgeError {
    fn from(hr: HResult) -> Self {
        match hr {
            HResult::E_NOINTERFACE => Self::NoInterface,
            HResult::E_OUTOFMEMORY => Self::OutOfMemory,
            HResult::E_POINTER => Self::NullPointer,
            other => Self::Native(other),
        }
    }
}

/// Safe handle to an `IAllocatorFactory`.
#[derive(Clone, Debug)]
pub struct AllocatorFactory {
    ptr: ComPtr<IAllocatorFactory>,
}

impl AllocatorFactory {
    pub fn new(library: Arc<dyn NativeAllocatorLibrary>) -> Result<Self, BridgeError> {
        Ok(Self {
            ptr: objects::create_factory(library)?,
        })
    }

    /// Creates an allocator for `device`. On UMA devices the allocator also owns a dedicated pool
    /// for CPU-visible heaps.
    pub fn create_allocator(
        &self,
        device: DeviceHandle,
        adapter: AdapterHandle,
    ) -> Result<Allocator, BridgeError> {
        let mut out: *mut c_void = ptr::null_mut();
        // SAFETY: live factory, valid out pointer.
        let hr = unsafe {
            (self.ptr.vtbl().create_allocator)(self.ptr.as_raw(), device, adapter, &mut out)
        };
        hr.ok()?;
        // SAFETY: success transfers one reference to a new allocator.
        let ptr = unsafe { ComPtr::from_raw(out) }.ok_or(BridgeError::NullPointer)?;
        Ok(Allocator { ptr })
    }

    pub fn as_com(&self) -> &ComPtr<IAllocatorFactory> {
        &self.ptr
    }
}

/// Safe handle to an `IAllocator`. Cloning adds a reference.
#[derive(Clone, Debug)]
pub struct Allocator {
    ptr: ComPtr<IAllocator>,
}

impl Allocator {
    pub fn create_resource(
        &self,
        allocation_desc: &AllocationDesc,
        resource_desc: &ResourceDesc,
    ) -> Result<Allocation, BridgeError> {
        let mut out: *mut c_void = ptr::null_mut();
        // SAFETY: live allocator, descriptors borrowed for the call, valid out pointer.
        let hr = unsafe {
            (self.ptr.vtbl().create_resource)(
                self.ptr.as_raw(),
                allocation_desc,
                resource_desc,
                &mut out,
            )
        };
        hr.ok()?;
        // SAFETY: success transfers one reference to a new allocation.
        let ptr = unsafe { ComPtr::from_raw(out) }.ok_or(BridgeError::NullPointer)?;
        Ok(Allocation { ptr })
    }

    pub fn is_uma(&self) -> bool {
        // SAFETY: live allocator.
        unsafe { (self.ptr.vtbl().is_uma)(self.ptr.as_raw()) != 0 }
    }

    pub fn as_com(&self) -> &ComPtr<IAllocator> {
        &self.ptr
    }
}

/// Safe handle to an `IAllocation`. Cloning adds a reference.
#[derive(Clone, Debug)]
pub struct Allocation {
    ptr: ComPtr<IAllocation>,
}

impl Allocation {
    pub fn resource(&self) -> NativeResource {
        // SAFETY: live allocation.
        let raw = unsafe { (self.ptr.vtbl().get_resource)(self.ptr.as_raw()) };
        // A live allocation always owns a resource handle.
        NativeResource::from_raw(raw).unwrap_or_else(|| unreachable!("allocation without resource"))
    }

    pub fn as_com(&self) -> &ComPtr<IAllocation> {
        &self.ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockAllocatorLibrary, NativeEvent};

    fn device() -> (DeviceHandle, AdapterHandle) {
        (
            DeviceHandle::from_raw(0x1000).unwrap(),
            AdapterHandle::from_raw(0x2000).unwrap(),
        )
    }

    fn buffer_desc() -> ResourceDesc {
        ResourceDesc::buffer(256, RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS)
    }

    #[test]
    fn allocation_keeps_allocator_alive() {
        let library = Arc::new(MockAllocatorLibrary::new());
        let factory = AllocatorFactory::new(library.clone()).unwrap();
        let (d, a) = device();
        let allocator = factory.create_allocator(d, a).unwrap();
        assert_eq!(allocator.as_com().ref_count(), 1);

        let allocation = allocator
            .create_resource(&AllocationDesc::default(), &buffer_desc())
            .unwrap();
        // The temporary reference taken during the call is gone; the allocation's remains.
        assert_eq!(allocator.as_com().ref_count(), 2);
        assert_eq!(allocation.as_com().ref_count(), 1);

        drop(allocator);
        assert_eq!(library.live_allocators(), 1, "allocation still holds the allocator");

        drop(allocation);
        assert_eq!(library.live_allocators(), 0);
        assert_eq!(library.live_resources(), 0);
    }

    #[test]
    fn query_interface_checks_identity() {
        let library = Arc::new(MockAllocatorLibrary::new());
        let factory = AllocatorFactory::new(library).unwrap();
        let (d, a) = device();
        let allocator = factory.create_allocator(d, a).unwrap();

        let unknown = allocator.as_com().query_interface::<IUnknown>().unwrap();
        assert_eq!(unknown.as_raw(), allocator.as_com().as_raw());
        assert_eq!(allocator.as_com().ref_count(), 2);
        drop(unknown);

        let err = allocator
            .as_com()
            .query_interface::<IAllocation>()
            .unwrap_err();
        assert_eq!(err, HResult::E_NOINTERFACE);
        assert_eq!(BridgeError::from(err), BridgeError::NoInterface);
        assert_eq!(allocator.as_com().ref_count(), 1);
    }

    #[test]
    fn native_failures_propagate_verbatim() {
        const DXGI_ERROR_DEVICE_REMOVED: HResult = HResult(0x887A_0005_u32 as i32);

        let library = Arc::new(MockAllocatorLibrary::new());
        let factory = AllocatorFactory::new(library.clone()).unwrap();
        let (d, a) = device();

        library.fail_next_create_allocator(DXGI_ERROR_DEVICE_REMOVED);
        let err = factory.create_allocator(d, a).unwrap_err();
        assert_eq!(err, BridgeError::Native(DXGI_ERROR_DEVICE_REMOVED));
        assert_eq!(err.hresult(), DXGI_ERROR_DEVICE_REMOVED);

        let allocator = factory.create_allocator(d, a).unwrap();
        library.fail_next_create_resource(HResult::E_OUTOFMEMORY);
        let err = allocator
            .create_resource(&AllocationDesc::default(), &buffer_desc())
            .unwrap_err();
        assert_eq!(err, BridgeError::OutOfMemory);
        // Nothing was leaked by the failed call.
        assert_eq!(allocator.as_com().ref_count(), 1);
        assert_eq!(library.live_resources(), 0);
    }

    #[test]
    fn uma_pool_serves_cpu_visible_heaps() {
        let library = Arc::new(MockAllocatorLibrary::uma());
        let factory = AllocatorFactory::new(library.clone()).unwrap();
        let (d, a) = device();
        let allocator = factory.create_allocator(d, a).unwrap();
        assert!(allocator.is_uma());

        let upload = AllocationDesc {
            heap_type: HeapType::Upload,
            ..Default::default()
        };
        let _staging = allocator.create_resource(&upload, &buffer_desc()).unwrap();
        let _local = allocator
            .create_resource(&AllocationDesc::default(), &buffer_desc())
            .unwrap();

        let pools: Vec<_> = library
            .events()
            .into_iter()
            .filter_map(|event| match event {
                NativeEvent::CreateResource { pool, .. } => Some(pool.is_some()),
                _ => None,
            })
            .collect();
        assert_eq!(pools, vec![true, false]);
    }
}
