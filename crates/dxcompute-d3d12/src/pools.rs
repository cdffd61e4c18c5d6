//! Reuse pools for command allocators and command lists.
//!
//! Pooled objects cycle `idle -> rented -> recording -> returned -> reset -> idle`. Returned
//! objects are queued without resetting; the reset happens on the next rent, after the queue
//! lock has been released, so a slow native reset never blocks other threads' rents.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::device::{CommandAllocator, CommandList, CommandListType, Device, DeviceError};
use crate::sync::{lock, Mutex};

/// A command list together with the allocator backing its recorded commands.
pub struct CommandListBundle<D: Device> {
    pub list: D::CommandList,
    pub allocator: D::CommandAllocator,
}

pub struct CommandListPool<D: Device> {
    ty: CommandListType,
    free: Mutex<VecDeque<CommandListBundle<D>>>,
}

impl<D: Device> CommandListPool<D> {
    pub fn new(ty: CommandListType) -> Self {
        Self {
            ty,
            free: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns an open list ready for recording, reusing a pooled pair when one is available.
    ///
    /// If resetting a pooled pair fails, the pair is dropped and the error is returned.
    pub fn rent(
        &self,
        device: &D,
        pipeline_state: Option<&D::PipelineState>,
    ) -> Result<CommandListBundle<D>, DeviceError> {
        let pooled = lock(&self.free).pop_front();

        if let Some(mut bundle) = pooled {
            bundle.allocator.reset()?;
            bundle.list.reset(&mut bundle.allocator, pipeline_state)?;
            trace!(ty = ?self.ty, "reused pooled command list");
            return Ok(bundle);
        }

        let mut allocator = device.create_command_allocator(self.ty)?;
        let list = device.create_command_list(self.ty, &mut allocator, pipeline_state)?;
        debug!(ty = ?self.ty, "created command list");
        Ok(CommandListBundle { list, allocator })
    }

    /// Queues a closed bundle for reuse. The GPU must be done with its commands.
    pub fn give_back(&self, bundle: CommandListBundle<D>) {
        lock(&self.free).push_back(bundle);
    }

    /// Creates `count` closed pairs up front.
    pub fn prewarm(&self, device: &D, count: usize) -> Result<(), DeviceError> {
        for _ in 0..count {
            let mut allocator = device.create_command_allocator(self.ty)?;
            let mut list = device.create_command_list(self.ty, &mut allocator, None)?;
            list.close()?;
            self.give_back(CommandListBundle { list, allocator });
        }
        debug!(ty = ?self.ty, count, "prewarmed command lists");
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.free).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Device> Drop for CommandListPool<D> {
    fn drop(&mut self) {
        let drained: Vec<_> = lock(&self.free).drain(..).collect();
        if !drained.is_empty() {
            debug!(ty = ?self.ty, count = drained.len(), "releasing pooled command lists");
        }
    }
}

pub struct CommandAllocatorPool<D: Device> {
    ty: CommandListType,
    free: Mutex<VecDeque<D::CommandAllocator>>,
}

impl<D: Device> CommandAllocatorPool<D> {
    pub fn new(ty: CommandListType) -> Self {
        Self {
            ty,
            free: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns a reset allocator.
    pub fn rent(&self, device: &D) -> Result<D::CommandAllocator, DeviceError> {
        let pooled = lock(&self.free).pop_front();
        match pooled {
            Some(mut allocator) => {
                allocator.reset()?;
                Ok(allocator)
            }
            None => device.create_command_allocator(self.ty),
        }
    }

    /// Queues an allocator for reuse. The GPU must be done with its commands.
    pub fn give_back(&self, allocator: D::CommandAllocator) {
        lock(&self.free).push_back(allocator);
    }

    pub fn len(&self) -> usize {
        lock(&self.free).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Device> Drop for CommandAllocatorPool<D> {
    fn drop(&mut self) {
        let drained: Vec<_> = lock(&self.free).drain(..).collect();
        if !drained.is_empty() {
            debug!(ty = ?self.ty, count = drained.len(), "releasing pooled command allocators");
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::test_utils::{MockDevice, MockPipelineState, RecordedCommand};

    #[test]
    fn rent_creates_then_reuses_fifo() {
        let device = MockDevice::new();
        let pool = CommandListPool::<MockDevice>::new(CommandListType::Compute);

        let mut a = pool.rent(&device, None).unwrap();
        let mut b = pool.rent(&device, None).unwrap();
        let (a_id, b_id) = (a.list.id(), b.list.id());
        a.list.close().unwrap();
        b.list.close().unwrap();
        assert_ne!(a_id, b_id);
        assert_eq!(device.created_command_lists(), 2);

        pool.give_back(a);
        pool.give_back(b);
        assert_eq!(pool.len(), 2);

        let pipeline = MockPipelineState {
            id: 77,
            bytecode: Vec::new(),
            root_parameters: 1,
        };
        let first = pool.rent(&device, Some(&pipeline)).unwrap();
        assert_eq!(first.list.id(), a_id);
        assert_eq!(first.allocator.resets(), 1);
        assert_eq!(first.list.resets(), 1);
        assert_eq!(first.list.initial_pipeline(), Some(77));
        assert_eq!(device.created_command_lists(), 2);
        assert_eq!(pool.len(), 1);

        let second = pool.rent(&device, None).unwrap();
        assert_eq!(second.list.id(), b_id);
        assert_eq!(second.list.initial_pipeline(), None);
    }

    #[test]
    fn returned_bundles_are_not_reset_until_rented() {
        let device = MockDevice::new();
        let pool = CommandListPool::<MockDevice>::new(CommandListType::Compute);
        let mut bundle = pool.rent(&device, None).unwrap();
        bundle.list.close().unwrap();
        pool.give_back(bundle);
        assert_eq!(device.allocator_resets(), 0);

        let _bundle = pool.rent(&device, None).unwrap();
        assert_eq!(device.allocator_resets(), 1);
    }

    #[test]
    fn failed_reset_drops_the_pair() {
        let device = MockDevice::new();
        let pool = CommandListPool::<MockDevice>::new(CommandListType::Compute);
        pool.prewarm(&device, 1).unwrap();
        assert_eq!(pool.len(), 1);

        device.fail_resets(true);
        let err = pool.rent(&device, None).err().unwrap();
        assert!(matches!(err, DeviceError::DeviceRemoved(_)));
        assert!(pool.is_empty());
        assert_eq!(device.live_command_lists(), 0);

        device.fail_resets(false);
        let bundle = pool.rent(&device, None).unwrap();
        assert_eq!(device.created_command_lists(), 2);
        assert!(bundle.list.commands().is_empty());
    }

    #[test]
    fn prewarmed_lists_are_closed() {
        let device = MockDevice::new();
        let pool = CommandListPool::<MockDevice>::new(CommandListType::Compute);
        pool.prewarm(&device, 3).unwrap();
        assert_eq!(pool.len(), 3);

        let bundle = pool.rent(&device, None).unwrap();
        // Rent reset the closed list, clearing its recorded close.
        assert_eq!(bundle.list.resets(), 1);
        assert!(!bundle.list.commands().contains(&RecordedCommand::Close));
    }

    #[test]
    fn drop_releases_pooled_objects() {
        let device = MockDevice::new();
        {
            let pool = CommandListPool::<MockDevice>::new(CommandListType::Compute);
            pool.prewarm(&device, 4).unwrap();
            assert_eq!(device.live_command_lists(), 4);
        }
        assert_eq!(device.live_command_lists(), 0);
    }

    #[test]
    fn allocator_pool_resets_on_rent() {
        let device = MockDevice::new();
        let pool = CommandAllocatorPool::<MockDevice>::new(CommandListType::Copy);
        let allocator = pool.rent(&device).unwrap();
        assert_eq!(allocator.resets(), 0);
        pool.give_back(allocator);
        let allocator = pool.rent(&device).unwrap();
        assert_eq!(allocator.resets(), 1);
        assert!(pool.is_empty());
    }
}
