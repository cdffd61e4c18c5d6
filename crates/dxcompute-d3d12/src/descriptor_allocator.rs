//! Fixed-capacity ring of descriptor slots over a shader-visible / non-shader-visible heap pair.

use tracing::debug;

use crate::device::{
    CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType, Device,
    DeviceError, GpuDescriptorHandle,
};
use crate::sync::{lock, Mutex};

pub const DESCRIPTOR_ALLOCATOR_CAPACITY: usize = 4096;

/// One descriptor slot: the shader-visible CPU/GPU pair plus the matching staging slot in the
/// non-shader-visible heap, where views are written before being copied over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorHandles {
    pub cpu: CpuDescriptorHandle,
    pub gpu: GpuDescriptorHandle,
    pub cpu_non_shader_visible: CpuDescriptorHandle,
}

struct Ring {
    slots: Box<[DescriptorHandles]>,
    head: usize,
    tail: usize,
    count: usize,
}

pub struct DescriptorHandleAllocator<D: Device> {
    shader_visible: D::DescriptorHeap,
    // Kept alive for the staging slots.
    _non_shader_visible: D::DescriptorHeap,
    ring: Mutex<Ring>,
}

impl<D: Device> DescriptorHandleAllocator<D> {
    pub fn new(device: &D) -> Result<Self, DeviceError> {
        let num_descriptors = DESCRIPTOR_ALLOCATOR_CAPACITY as u32;
        let shader_visible = device.create_descriptor_heap(&DescriptorHeapDesc {
            heap_type: DescriptorHeapType::CbvSrvUav,
            num_descriptors,
            shader_visible: true,
        })?;
        let non_shader_visible = device.create_descriptor_heap(&DescriptorHeapDesc {
            heap_type: DescriptorHeapType::CbvSrvUav,
            num_descriptors,
            shader_visible: false,
        })?;

        let increment = device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav);
        let cpu_start = shader_visible.cpu_start();
        let gpu_start = shader_visible
            .gpu_start()
            .ok_or(DeviceError::Unsupported("shader-visible heap without a GPU handle"))?;
        let staging_start = non_shader_visible.cpu_start();

        let slots: Box<[DescriptorHandles]> = (0..DESCRIPTOR_ALLOCATOR_CAPACITY)
            .map(|i| {
                let offset = i * increment as usize;
                DescriptorHandles {
                    cpu: cpu_start.offset(offset),
                    gpu: gpu_start.offset(offset as u64),
                    cpu_non_shader_visible: staging_start.offset(offset),
                }
            })
            .collect();

        debug!(
            capacity = DESCRIPTOR_ALLOCATOR_CAPACITY,
            increment, "created descriptor allocator"
        );

        Ok(Self {
            shader_visible,
            _non_shader_visible: non_shader_visible,
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
                count: DESCRIPTOR_ALLOCATOR_CAPACITY,
            }),
        })
    }

    /// # Panics
    ///
    /// Panics if every slot is rented.
    pub fn rent(&self) -> DescriptorHandles {
        let mut ring = lock(&self.ring);
        assert!(ring.count > 0, "descriptor allocator exhausted");
        let handles = ring.slots[ring.head];
        ring.head = (ring.head + 1) % DESCRIPTOR_ALLOCATOR_CAPACITY;
        ring.count -= 1;
        handles
    }

    /// # Panics
    ///
    /// Panics if more slots are returned than were rented.
    pub fn give_back(&self, handles: DescriptorHandles) {
        let mut ring = lock(&self.ring);
        assert!(
            ring.count < DESCRIPTOR_ALLOCATOR_CAPACITY,
            "descriptor allocator over-returned"
        );
        let tail = ring.tail;
        ring.slots[tail] = handles;
        ring.tail = (tail + 1) % DESCRIPTOR_ALLOCATOR_CAPACITY;
        ring.count += 1;
    }

    /// The heap to bind while recording dispatches that use rented slots.
    pub fn shader_visible_heap(&self) -> &D::DescriptorHeap {
        &self.shader_visible
    }

    pub fn available(&self) -> usize {
        lock(&self.ring).count
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::test_utils::MockDevice;
    use std::collections::HashSet;

    #[test]
    fn handles_are_offset_by_the_increment() {
        let device = MockDevice::new();
        let allocator = DescriptorHandleAllocator::new(&device).unwrap();
        let increment = device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav) as usize;

        let first = allocator.rent();
        let second = allocator.rent();
        assert_eq!(second.cpu.0 - first.cpu.0, increment);
        assert_eq!((second.gpu.0 - first.gpu.0) as usize, increment);
        assert_eq!(
            second.cpu_non_shader_visible.0 - first.cpu_non_shader_visible.0,
            increment
        );
        assert_eq!(
            first.gpu,
            allocator.shader_visible_heap().gpu_start().unwrap()
        );
        assert_ne!(first.cpu, first.cpu_non_shader_visible);
    }

    #[test]
    fn full_capacity_is_distinct_and_reusable() {
        let device = MockDevice::new();
        let allocator = DescriptorHandleAllocator::new(&device).unwrap();

        let rented: Vec<_> = (0..DESCRIPTOR_ALLOCATOR_CAPACITY)
            .map(|_| allocator.rent())
            .collect();
        assert_eq!(allocator.available(), 0);
        let distinct: HashSet<_> = rented.iter().map(|h| h.cpu).collect();
        assert_eq!(distinct.len(), DESCRIPTOR_ALLOCATOR_CAPACITY);

        for handles in rented.into_iter().rev() {
            allocator.give_back(handles);
        }
        assert_eq!(allocator.available(), DESCRIPTOR_ALLOCATOR_CAPACITY);
        let _again = allocator.rent();
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn renting_from_empty_panics() {
        let device = MockDevice::new();
        let allocator = DescriptorHandleAllocator::new(&device).unwrap();
        for _ in 0..=DESCRIPTOR_ALLOCATOR_CAPACITY {
            allocator.rent();
        }
    }

    #[test]
    #[should_panic(expected = "over-returned")]
    fn returning_into_full_panics() {
        let device = MockDevice::new();
        let allocator = DescriptorHandleAllocator::new(&device).unwrap();
        let handles = allocator.rent();
        allocator.give_back(handles);
        allocator.give_back(handles);
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::test_utils::MockDevice;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn concurrent_rent_and_return_preserves_count() {
        loom::model(|| {
            let device = MockDevice::new();
            let allocator = Arc::new(DescriptorHandleAllocator::new(&device).unwrap());

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let allocator = allocator.clone();
                    thread::spawn(move || {
                        let handles = allocator.rent();
                        allocator.give_back(handles);
                        handles
                    })
                })
                .collect();
            let rented: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(allocator.available(), DESCRIPTOR_ALLOCATOR_CAPACITY);
            assert_eq!(rented.len(), 2);
        });
    }
}
