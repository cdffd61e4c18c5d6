//! Minimal COM ABI: interface identities, status codes, the `IUnknown` vtable and a counted
//! smart pointer.
//!
//! Every bridge object is `#[repr(C)]` with a [`ComHeader`] as its first field, so a pointer to
//! the object is also a pointer to its vtable pointer, exactly like a native COM object.

use std::alloc::{alloc, dealloc, Layout};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// COM `GUID`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Builds a GUID from its canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` value.
    pub const fn from_u128(v: u128) -> Self {
        Self {
            data1: (v >> 96) as u32,
            data2: (v >> 80) as u16,
            data3: (v >> 64) as u16,
            data4: (v as u64).to_be_bytes(),
        }
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// COM `HRESULT`. Negative values are failures.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: Self = Self(0);
    pub const E_NOINTERFACE: Self = Self(0x8000_4002_u32 as i32);
    pub const E_POINTER: Self = Self(0x8000_4003_u32 as i32);
    pub const E_OUTOFMEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);

    pub fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub fn is_err(self) -> bool {
        self.0 < 0
    }

    pub fn ok(self) -> Result<(), HResult> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({:#010x})", self.0 as u32)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);

#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface: unsafe extern "system" fn(
        this: *mut c_void,
        iid: *const Guid,
        out: *mut *mut c_void,
    ) -> HResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

/// A COM interface: an identity plus a vtable layout.
///
/// # Safety
///
/// `Vtbl` must be `#[repr(C)]` and start with an [`IUnknownVtbl`].
pub unsafe trait Interface {
    const IID: Guid;
    type Vtbl: 'static;
}

pub enum IUnknown {}

// SAFETY: `IUnknownVtbl` trivially starts with itself.
unsafe impl Interface for IUnknown {
    const IID: Guid = IID_IUNKNOWN;
    type Vtbl = IUnknownVtbl;
}

/// Counted reference to a COM object implementing `I`.
///
/// `Clone` is `AddRef`, `Drop` is `Release`.
pub struct ComPtr<I: Interface> {
    ptr: NonNull<c_void>,
    _marker: PhantomData<I>,
}

// SAFETY: every bridge object uses atomic reference counts and only holds `Send + Sync` state.
unsafe impl<I: Interface> Send for ComPtr<I> {}
// SAFETY: see above; interface methods take `this` by shared pointer.
unsafe impl<I: Interface> Sync for ComPtr<I> {}

impl<I: Interface> ComPtr<I> {
    /// Takes ownership of one reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live COM object implementing `I`, and the caller must
    /// own the reference being transferred.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _marker: PhantomData,
        })
    }

    /// Adds a new reference to a borrowed pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live COM object implementing `I`.
    pub unsafe fn from_borrowed(ptr: *mut c_void) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        ((**ptr.as_ptr().cast::<*const IUnknownVtbl>()).add_ref)(ptr.as_ptr());
        Some(Self {
            ptr,
            _marker: PhantomData,
        })
    }

    /// Gives up ownership of the reference without releasing it.
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    fn unknown(&self) -> &IUnknownVtbl {
        // SAFETY: `I::Vtbl` starts with `IUnknownVtbl` and the object is alive while `self` is.
        unsafe { &**self.ptr.as_ptr().cast::<*const IUnknownVtbl>() }
    }

    pub fn vtbl(&self) -> &I::Vtbl {
        // SAFETY: the object implements `I`, so its vtable pointer points at an `I::Vtbl`.
        unsafe { &**self.ptr.as_ptr().cast::<*const I::Vtbl>() }
    }

    /// Returns a counted reference for interface `J`, or `E_NOINTERFACE` if the object does not
    /// implement it.
    pub fn query_interface<J: Interface>(&self) -> Result<ComPtr<J>, HResult> {
        let mut out = ptr::null_mut();
        // SAFETY: valid object, valid IID pointer and out pointer.
        let hr = unsafe { (self.unknown().query_interface)(self.as_raw(), &J::IID, &mut out) };
        hr.ok()?;
        // SAFETY: a successful QueryInterface hands us one reference to a `J`.
        unsafe { ComPtr::from_raw(out) }.ok_or(HResult::E_POINTER)
    }

    /// Current reference count. Only meaningful in single-threaded tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn ref_count(&self) -> u32 {
        let unknown = self.unknown();
        // SAFETY: balanced AddRef/Release on a live object.
        unsafe {
            let count = (unknown.add_ref)(self.as_raw());
            (unknown.release)(self.as_raw());
            count - 1
        }
    }
}

impl<I: Interface> Clone for ComPtr<I> {
    fn clone(&self) -> Self {
        // SAFETY: `self` keeps the object alive for the duration of the call.
        unsafe { (self.unknown().add_ref)(self.as_raw()) };
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<I: Interface> Drop for ComPtr<I> {
    fn drop(&mut self) {
        // SAFETY: we own exactly one reference.
        unsafe { (self.unknown().release)(self.as_raw()) };
    }
}

impl<I: Interface> fmt::Debug for ComPtr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComPtr").field(&self.ptr).finish()
    }
}

/// Common prefix of every bridge object.
#[repr(C)]
pub(crate) struct ComHeader<V: 'static> {
    // Only read through the object pointer by callers.
    #[allow(dead_code)]
    vtbl: &'static V,
    ref_count: AtomicU32,
}

impl<V: 'static> ComHeader<V> {
    pub(crate) const fn new(vtbl: &'static V) -> Self {
        Self {
            vtbl,
            ref_count: AtomicU32::new(1),
        }
    }
}

/// A Rust type laid out as a COM object.
///
/// # Safety
///
/// The type must be `#[repr(C)]` with a `ComHeader<Self::Vtbl>` as its first field, and
/// `Self::Vtbl` must start with an [`IUnknownVtbl`].
pub(crate) unsafe trait ComObject: Sized + 'static {
    type Vtbl: 'static;
    /// Interfaces the object answers to besides `IUnknown`.
    const IIDS: &'static [Guid];

    fn header(&self) -> &ComHeader<Self::Vtbl>;
}

/// Moves `value` to the heap with a reference count of one.
///
/// Returns `E_OUTOFMEMORY` if the allocation fails; `value` is dropped in that case.
pub(crate) fn into_raw_object<T: ComObject>(value: T) -> Result<*mut c_void, HResult> {
    let layout = Layout::new::<T>();
    // SAFETY: `T` starts with a `ComHeader`, so its layout is non-zero-sized.
    let ptr = unsafe { alloc(layout) }.cast::<T>();
    if ptr.is_null() {
        drop(value);
        return Err(HResult::E_OUTOFMEMORY);
    }
    // SAFETY: freshly allocated with `T`'s layout.
    unsafe { ptr.write(value) };
    Ok(ptr.cast())
}

/// Borrows the object behind a COM `this` pointer.
///
/// # Safety
///
/// `this` must point to a live `T` created by [`into_raw_object`].
pub(crate) unsafe fn object_ref<'a, T: ComObject>(this: *mut c_void) -> &'a T {
    &*this.cast::<T>()
}

pub(crate) unsafe extern "system" fn query_interface<T: ComObject>(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();
    if iid.is_null() {
        return HResult::E_POINTER;
    }

    let iid = *iid;
    if iid != IID_IUNKNOWN && !T::IIDS.contains(&iid) {
        return HResult::E_NOINTERFACE;
    }
    add_ref::<T>(this);
    *out = this;
    HResult::S_OK
}

pub(crate) unsafe extern "system" fn add_ref<T: ComObject>(this: *mut c_void) -> u32 {
    object_ref::<T>(this)
        .header()
        .ref_count
        .fetch_add(1, Ordering::Relaxed)
        + 1
}

pub(crate) unsafe extern "system" fn release<T: ComObject>(this: *mut c_void) -> u32 {
    let previous = object_ref::<T>(this)
        .header()
        .ref_count
        .fetch_sub(1, Ordering::Release);
    if previous != 1 {
        return previous - 1;
    }

    // Synchronizes with every earlier `Release` decrement before tearing the object down.
    fence(Ordering::Acquire);
    let ptr = this.cast::<T>();
    ptr::drop_in_place(ptr);
    dealloc(ptr.cast(), Layout::new::<T>());
    0
}

/// Vtable prefix for `T`.
pub(crate) const fn unknown_vtbl<T: ComObject>() -> IUnknownVtbl {
    IUnknownVtbl {
        query_interface: query_interface::<T>,
        add_ref: add_ref::<T>,
        release: release::<T>,
    }
}
