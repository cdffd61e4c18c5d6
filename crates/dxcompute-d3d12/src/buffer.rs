//! Structured device buffers backed by the native allocator.

use std::marker::PhantomData;
use std::sync::Arc;

use dxcompute_d3d12ma::{
    Allocation, AllocationDesc, Allocator, BridgeError, HeapType, NativeResource, ResourceDesc,
    RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
};
use dxcompute_hlsl::known_types::mapped_type_name;
use dxcompute_hlsl::{HlslType, RegisterClass, TypeRef};
use thiserror::Error;
use tracing::trace;

use crate::descriptor_allocator::{DescriptorHandleAllocator, DescriptorHandles};
use crate::device::{BufferViewDesc, BufferViewKind, DescriptorHeapType, Device, GpuDescriptorHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// `RWStructuredBuffer<T>`, bound to a `u#` register.
    ReadWrite,
    /// `StructuredBuffer<T>`, bound to a `t#` register.
    ReadOnly,
}

impl BufferKind {
    /// Host path under which programs declare fields of this kind.
    pub fn host_path(self) -> &'static str {
        match self {
            Self::ReadWrite => "dxcompute_d3d12::ReadWriteBuffer",
            Self::ReadOnly => "dxcompute_d3d12::ReadOnlyBuffer",
        }
    }

    pub fn register_class(self) -> RegisterClass {
        match self {
            Self::ReadWrite => RegisterClass::Uav,
            Self::ReadOnly => RegisterClass::Srv,
        }
    }

    fn view_kind(self) -> BufferViewKind {
        match self {
            Self::ReadWrite => BufferViewKind::Uav,
            Self::ReadOnly => BufferViewKind::Srv,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer length must be non-zero")]
    ZeroLength,
    #[error("buffer of {len} elements of {stride} bytes exceeds the addressable size")]
    TooLarge { len: usize, stride: u32 },
    #[error("buffer allocation failed: {0}")]
    Allocation(#[from] BridgeError),
}

/// A structured buffer with one descriptor slot for its lifetime.
///
/// Dropping the buffer returns the slot, then releases the allocation.
pub struct DeviceBuffer<D: Device> {
    kind: BufferKind,
    hlsl_type: String,
    len: usize,
    stride: u32,
    handles: DescriptorHandles,
    descriptors: Arc<DescriptorHandleAllocator<D>>,
    allocation: Allocation,
}

impl<D: Device> DeviceBuffer<D> {
    /// Allocates a buffer of `len` elements of `T` and writes its view.
    pub fn new<T: HlslType>(
        device: &D,
        allocator: &Allocator,
        descriptors: &Arc<DescriptorHandleAllocator<D>>,
        kind: BufferKind,
        len: usize,
    ) -> Result<Self, BufferError> {
        let stride = T::HLSL_SIZE;
        if len == 0 {
            return Err(BufferError::ZeroLength);
        }
        let num_elements = u32::try_from(len).map_err(|_| BufferError::TooLarge { len, stride })?;
        let width = u64::from(num_elements) * u64::from(stride);

        let flags = match kind {
            BufferKind::ReadWrite => RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
            BufferKind::ReadOnly => 0,
        };
        let allocation = allocator.create_resource(
            &AllocationDesc {
                heap_type: HeapType::Default,
                flags: 0,
            },
            &ResourceDesc::buffer(width, flags),
        )?;

        let handles = descriptors.rent();
        device.create_buffer_view(
            allocation.resource(),
            &BufferViewDesc {
                kind: kind.view_kind(),
                num_elements,
                stride,
            },
            handles.cpu_non_shader_visible,
        );
        device.copy_descriptor(
            handles.cpu,
            handles.cpu_non_shader_visible,
            DescriptorHeapType::CbvSrvUav,
        );

        let hlsl_type = mapped_type_name(&TypeRef::generic(
            kind.host_path(),
            [TypeRef::path(T::HOST_PATH)],
        ));
        trace!(%hlsl_type, len, width, "created device buffer");

        Ok(Self {
            kind,
            hlsl_type,
            len,
            stride,
            handles,
            descriptors: Arc::clone(descriptors),
            allocation,
        })
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// HLSL declaration type, e.g. `RWStructuredBuffer<float4>`.
    pub fn hlsl_type(&self) -> &str {
        &self.hlsl_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn size_bytes(&self) -> u64 {
        self.len as u64 * u64::from(self.stride)
    }

    /// Handle bound to the buffer's descriptor table during dispatch.
    pub fn gpu_handle(&self) -> GpuDescriptorHandle {
        self.handles.gpu
    }

    pub fn resource(&self) -> NativeResource {
        self.allocation.resource()
    }

    pub(crate) fn matches_binding(&self, class: RegisterClass, hlsl_type: &str) -> bool {
        self.kind.register_class() == class && self.hlsl_type == hlsl_type
    }
}

impl<D: Device> Drop for DeviceBuffer<D> {
    fn drop(&mut self) {
        self.descriptors.give_back(self.handles);
    }
}

/// Element-typed marker for read-write buffer fields of a program.
pub struct ReadWriteBuffer<T>(PhantomData<T>);

/// Element-typed marker for read-only buffer fields of a program.
pub struct ReadOnlyBuffer<T>(PhantomData<T>);

impl<T: HlslType> ReadWriteBuffer<T> {
    /// The reflection type reference for a field of this type.
    pub fn type_ref() -> TypeRef {
        TypeRef::generic(BufferKind::ReadWrite.host_path(), [TypeRef::path(T::HOST_PATH)])
    }
}

impl<T: HlslType> ReadOnlyBuffer<T> {
    /// The reflection type reference for a field of this type.
    pub fn type_ref() -> TypeRef {
        TypeRef::generic(BufferKind::ReadOnly.host_path(), [TypeRef::path(T::HOST_PATH)])
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::test_utils::MockDevice;
    use dxcompute_d3d12ma::test_utils::{MockAllocatorLibrary, NativeEvent};
    use dxcompute_d3d12ma::{AdapterHandle, AllocatorFactory, DeviceHandle};
    use dxcompute_hlsl::known_types::resource_register_class;

    fn allocator(library: &Arc<MockAllocatorLibrary>) -> Allocator {
        AllocatorFactory::new(library.clone())
            .unwrap()
            .create_allocator(
                DeviceHandle::from_raw(1).unwrap(),
                AdapterHandle::from_raw(2).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn host_paths_are_known_resource_types() {
        for kind in [BufferKind::ReadWrite, BufferKind::ReadOnly] {
            assert_eq!(resource_register_class(kind.host_path()), Some(kind.register_class()));
        }
        assert_eq!(
            mapped_type_name(&ReadWriteBuffer::<glam::Vec4>::type_ref()),
            "RWStructuredBuffer<float4>"
        );
        assert_eq!(
            mapped_type_name(&ReadOnlyBuffer::<u32>::type_ref()),
            "StructuredBuffer<uint>"
        );
    }

    #[test]
    fn buffer_holds_one_descriptor_slot_for_its_lifetime() {
        let device = MockDevice::new();
        let library = Arc::new(MockAllocatorLibrary::new());
        let allocator = allocator(&library);
        let descriptors = Arc::new(DescriptorHandleAllocator::new(&device).unwrap());

        let buffer = DeviceBuffer::new::<f32>(
            &device,
            &allocator,
            &descriptors,
            BufferKind::ReadWrite,
            256,
        )
        .unwrap();
        assert_eq!(buffer.hlsl_type(), "RWStructuredBuffer<float>");
        assert_eq!(buffer.size_bytes(), 1024);
        assert_eq!(
            descriptors.available(),
            crate::DESCRIPTOR_ALLOCATOR_CAPACITY - 1
        );

        let views = device.buffer_views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].0, buffer.resource());
        assert_eq!(views[0].1.kind, BufferViewKind::Uav);
        assert_eq!(device.copied_descriptors(), 1);

        drop(buffer);
        assert_eq!(descriptors.available(), crate::DESCRIPTOR_ALLOCATOR_CAPACITY);
        assert_eq!(library.live_resources(), 0);
        assert!(library
            .events()
            .iter()
            .any(|e| matches!(e, NativeEvent::CreateResource { width: 1024, .. })));
    }

    #[test]
    fn allocation_failure_rents_no_slot() {
        let device = MockDevice::new();
        let library = Arc::new(MockAllocatorLibrary::new());
        let allocator = allocator(&library);
        let descriptors = Arc::new(DescriptorHandleAllocator::new(&device).unwrap());

        library.fail_next_create_resource(dxcompute_d3d12ma::HResult::E_OUTOFMEMORY);
        let err = DeviceBuffer::new::<u32>(&device, &allocator, &descriptors, BufferKind::ReadOnly, 4)
            .err()
            .unwrap();
        assert_eq!(err, BufferError::Allocation(BridgeError::OutOfMemory));
        assert_eq!(descriptors.available(), crate::DESCRIPTOR_ALLOCATOR_CAPACITY);

        let err = DeviceBuffer::new::<u32>(&device, &allocator, &descriptors, BufferKind::ReadOnly, 0)
            .err()
            .unwrap();
        assert_eq!(err, BufferError::ZeroLength);
    }
}
