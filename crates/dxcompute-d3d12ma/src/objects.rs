//! Bridge objects: factory, allocator and allocation, each a COM object over native handles.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use tracing::debug;

use crate::com::{
    into_raw_object, object_ref, unknown_vtbl, ComHeader, ComObject, ComPtr, Guid, HResult,
    IUnknownVtbl, Interface,
};
use crate::native::{
    AdapterHandle, AllocationDesc, DeviceHandle, NativeAllocation, NativeAllocator,
    NativeAllocatorLibrary, NativePool, NativeResource, ResourceDesc,
};

pub enum IAllocatorFactory {}
pub enum IAllocator {}
pub enum IAllocation {}

pub const IID_IALLOCATOR_FACTORY: Guid = Guid::from_u128(0x2d6f4b0e_5a77_4c1b_9f0e_6b1f3c2a7d01);
pub const IID_IALLOCATOR: Guid = Guid::from_u128(0x2d6f4b0e_5a77_4c1b_9f0e_6b1f3c2a7d02);
pub const IID_IALLOCATION: Guid = Guid::from_u128(0x2d6f4b0e_5a77_4c1b_9f0e_6b1f3c2a7d03);

#[repr(C)]
pub struct IAllocatorFactoryVtbl {
    pub base: IUnknownVtbl,
    pub create_allocator: unsafe extern "system" fn(
        this: *mut c_void,
        device: DeviceHandle,
        adapter: AdapterHandle,
        out: *mut *mut c_void,
    ) -> HResult,
}

#[repr(C)]
pub struct IAllocatorVtbl {
    pub base: IUnknownVtbl,
    pub create_resource: unsafe extern "system" fn(
        this: *mut c_void,
        allocation_desc: *const AllocationDesc,
        resource_desc: *const ResourceDesc,
        out: *mut *mut c_void,
    ) -> HResult,
    /// Returns a Win32 `BOOL`.
    pub is_uma: unsafe extern "system" fn(this: *mut c_void) -> i32,
}

#[repr(C)]
pub struct IAllocationVtbl {
    pub base: IUnknownVtbl,
    /// Returns the raw `ID3D12Resource*`, never null for a live allocation.
    pub get_resource: unsafe extern "system" fn(this: *mut c_void) -> usize,
}

// SAFETY: all three vtables are `#[repr(C)]` and start with `IUnknownVtbl`.
unsafe impl Interface for IAllocatorFactory {
    const IID: Guid = IID_IALLOCATOR_FACTORY;
    type Vtbl = IAllocatorFactoryVtbl;
}

// SAFETY: see above.
unsafe impl Interface for IAllocator {
    const IID: Guid = IID_IALLOCATOR;
    type Vtbl = IAllocatorVtbl;
}

// SAFETY: see above.
unsafe impl Interface for IAllocation {
    const IID: Guid = IID_IALLOCATION;
    type Vtbl = IAllocationVtbl;
}

// ---------------------------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct FactoryObject {
    header: ComHeader<IAllocatorFactoryVtbl>,
    library: Arc<dyn NativeAllocatorLibrary>,
}

// SAFETY: `#[repr(C)]` with the header first.
unsafe impl ComObject for FactoryObject {
    type Vtbl = IAllocatorFactoryVtbl;
    const IIDS: &'static [Guid] = &[IID_IALLOCATOR_FACTORY];

    fn header(&self) -> &ComHeader<Self::Vtbl> {
        &self.header
    }
}

static FACTORY_VTBL: IAllocatorFactoryVtbl = IAllocatorFactoryVtbl {
    base: unknown_vtbl::<FactoryObject>(),
    create_allocator: factory_create_allocator,
};

/// Creates a factory with a reference count of one.
pub(crate) fn create_factory(
    library: Arc<dyn NativeAllocatorLibrary>,
) -> Result<ComPtr<IAllocatorFactory>, HResult> {
    let raw = into_raw_object(FactoryObject {
        header: ComHeader::new(&FACTORY_VTBL),
        library,
    })?;
    // SAFETY: `raw` is a fresh factory object and we own its only reference.
    unsafe { ComPtr::from_raw(raw) }.ok_or(HResult::E_POINTER)
}

unsafe extern "system" fn factory_create_allocator(
    this: *mut c_void,
    device: DeviceHandle,
    adapter: AdapterHandle,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();

    let factory = object_ref::<FactoryObject>(this);
    let library = &factory.library;

    let native = match library.create_allocator(device, adapter) {
        Ok(native) => native,
        Err(hr) => return hr,
    };

    let is_uma = library.is_unified_memory(native);
    let pool = if is_uma {
        match library.create_pool_for_unified_memory(native) {
            Ok(pool) => Some(pool),
            Err(hr) => {
                library.release_allocator(native);
                return hr;
            }
        }
    } else {
        None
    };

    debug!(
        allocator = native.as_raw(),
        is_uma,
        "created native allocator"
    );

    // On failure the object is dropped, which releases the pool and the native allocator.
    match into_raw_object(AllocatorObject {
        header: ComHeader::new(&ALLOCATOR_VTBL),
        library: Arc::clone(library),
        native,
        pool,
        is_uma,
    }) {
        Ok(raw) => {
            *out = raw;
            HResult::S_OK
        }
        Err(hr) => hr,
    }
}

// ---------------------------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct AllocatorObject {
    header: ComHeader<IAllocatorVtbl>,
    library: Arc<dyn NativeAllocatorLibrary>,
    native: NativeAllocator,
    /// Dedicated pool for CPU-visible heaps; only created on UMA devices.
    pool: Option<NativePool>,
    is_uma: bool,
}

// SAFETY: `#[repr(C)]` with the header first.
unsafe impl ComObject for AllocatorObject {
    type Vtbl = IAllocatorVtbl;
    const IIDS: &'static [Guid] = &[IID_IALLOCATOR];

    fn header(&self) -> &ComHeader<Self::Vtbl> {
        &self.header
    }
}

impl Drop for AllocatorObject {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            self.library.release_pool(pool);
        }
        self.library.release_allocator(self.native);
        debug!(allocator = self.native.as_raw(), "released native allocator");
    }
}

static ALLOCATOR_VTBL: IAllocatorVtbl = IAllocatorVtbl {
    base: unknown_vtbl::<AllocatorObject>(),
    create_resource: allocator_create_resource,
    is_uma: allocator_is_uma,
};

unsafe extern "system" fn allocator_create_resource(
    this: *mut c_void,
    allocation_desc: *const AllocationDesc,
    resource_desc: *const ResourceDesc,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();
    if allocation_desc.is_null() || resource_desc.is_null() {
        return HResult::E_POINTER;
    }

    // Keeps the allocator alive for the whole call, independently of the caller's reference.
    let Some(allocator) = ComPtr::<IAllocator>::from_borrowed(this) else {
        return HResult::E_POINTER;
    };
    let object = object_ref::<AllocatorObject>(this);
    let allocation_desc = &*allocation_desc;
    let resource_desc = &*resource_desc;

    let pool = object
        .pool
        .filter(|_| allocation_desc.heap_type.is_cpu_visible());

    let (native_allocation, resource) = match object.library.create_resource(
        object.native,
        pool,
        allocation_desc,
        resource_desc,
    ) {
        Ok(created) => created,
        Err(hr) => return hr,
    };

    // On failure the object is dropped, which releases the native pair and the allocator clone.
    match into_raw_object(AllocationObject {
        header: ComHeader::new(&ALLOCATION_VTBL),
        library: Arc::clone(&object.library),
        native: native_allocation,
        resource,
        allocator: allocator.clone(),
    }) {
        Ok(raw) => {
            *out = raw;
            HResult::S_OK
        }
        Err(hr) => hr,
    }
}

unsafe extern "system" fn allocator_is_uma(this: *mut c_void) -> i32 {
    i32::from(object_ref::<AllocatorObject>(this).is_uma)
}

// ---------------------------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct AllocationObject {
    header: ComHeader<IAllocationVtbl>,
    library: Arc<dyn NativeAllocatorLibrary>,
    native: NativeAllocation,
    resource: NativeResource,
    /// Dropped after `Drop::drop` has released the native pair.
    #[allow(dead_code)]
    allocator: ComPtr<IAllocator>,
}

// SAFETY: `#[repr(C)]` with the header first.
unsafe impl ComObject for AllocationObject {
    type Vtbl = IAllocationVtbl;
    const IIDS: &'static [Guid] = &[IID_IALLOCATION];

    fn header(&self) -> &ComHeader<Self::Vtbl> {
        &self.header
    }
}

impl Drop for AllocationObject {
    fn drop(&mut self) {
        self.library.release_resource(self.resource);
        self.library.release_allocation(self.native);
    }
}

static ALLOCATION_VTBL: IAllocationVtbl = IAllocationVtbl {
    base: unknown_vtbl::<AllocationObject>(),
    get_resource: allocation_get_resource,
};

unsafe extern "system" fn allocation_get_resource(this: *mut c_void) -> usize {
    object_ref::<AllocationObject>(this).resource.as_raw()
}
