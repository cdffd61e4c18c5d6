//! The external allocator library seam.
//!
//! The native library is opaque: it hands out handles and takes them back. The bridge objects
//! own every handle they receive and return each one exactly once.

use std::num::NonZeroUsize;

use crate::com::HResult;

macro_rules! native_handles {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(transparent)]
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(NonZeroUsize);

            impl $name {
                pub const fn new(raw: NonZeroUsize) -> Self {
                    Self(raw)
                }

                pub fn from_raw(raw: usize) -> Option<Self> {
                    NonZeroUsize::new(raw).map(Self)
                }

                pub fn as_raw(self) -> usize {
                    self.0.get()
                }
            }
        )*
    };
}

native_handles! {
    /// `ID3D12Device*`.
    DeviceHandle;
    /// `IDXGIAdapter*`.
    AdapterHandle;
    /// `D3D12MA::Allocator*`.
    NativeAllocator;
    /// `D3D12MA::Pool*`.
    NativePool;
    /// `D3D12MA::Allocation*`.
    NativeAllocation;
    /// `ID3D12Resource*`.
    NativeResource;
}

/// `D3D12_HEAP_TYPE`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HeapType {
    #[default]
    Default = 1,
    Upload = 2,
    Readback = 3,
}

impl HeapType {
    /// Upload and readback heaps are CPU visible; on UMA devices they come from the dedicated
    /// pool.
    pub fn is_cpu_visible(self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationDesc {
    pub heap_type: HeapType,
    pub flags: u32,
}

/// `D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS`.
pub const RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS: u32 = 0x4;

/// Buffer resource description.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceDesc {
    pub width: u64,
    pub alignment: u64,
    pub flags: u32,
}

impl ResourceDesc {
    pub fn buffer(width: u64, flags: u32) -> Self {
        Self {
            width,
            alignment: 0,
            flags,
        }
    }
}

/// Operations the bridge needs from the native allocator library.
pub trait NativeAllocatorLibrary: Send + Sync {
    fn create_allocator(
        &self,
        device: DeviceHandle,
        adapter: AdapterHandle,
    ) -> Result<NativeAllocator, HResult>;

    fn is_unified_memory(&self, allocator: NativeAllocator) -> bool;

    fn create_pool_for_unified_memory(
        &self,
        allocator: NativeAllocator,
    ) -> Result<NativePool, HResult>;

    fn create_resource(
        &self,
        allocator: NativeAllocator,
        pool: Option<NativePool>,
        allocation_desc: &AllocationDesc,
        resource_desc: &ResourceDesc,
    ) -> Result<(NativeAllocation, NativeResource), HResult>;

    fn release_resource(&self, resource: NativeResource);
    fn release_allocation(&self, allocation: NativeAllocation);
    fn release_pool(&self, pool: NativePool);
    fn release_allocator(&self, allocator: NativeAllocator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_reject_null() {
        assert_eq!(NativeResource::from_raw(0), None);
        assert_eq!(NativeResource::from_raw(0x10).map(NativeResource::as_raw), Some(0x10));
    }

    #[test]
    fn cpu_visible_heaps() {
        assert!(!HeapType::Default.is_cpu_visible());
        assert!(HeapType::Upload.is_cpu_visible());
        assert!(HeapType::Readback.is_cpu_visible());
    }
}
