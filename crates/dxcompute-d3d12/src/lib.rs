//! D3D12 compute dispatch engine.
//!
//! Programs are assembled into HLSL by `dxcompute-hlsl`, compiled once per thread-group shape
//! through a [`ShaderCompiler`], and dispatched through a [`ComputeDevice`] that pools the
//! command lists, descriptor slots and packing arrays each dispatch needs.
//!
//! The native API sits behind the traits in [`device`]; resource memory comes from
//! `dxcompute-d3d12ma`.

pub mod array_pool;
pub mod buffer;
pub mod cache;
pub mod compute;
pub mod config;
pub mod descriptor_allocator;
pub mod device;
pub mod dispatch_data;
pub mod pools;
mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use array_pool::{ArrayPool, ArrayPoolStats};
pub use buffer::{BufferError, BufferKind, DeviceBuffer, ReadOnlyBuffer, ReadWriteBuffer};
pub use cache::{CacheStats, CachedShader, ShaderCache, ShaderIdentity, ShaderKey, ShaderLoader};
pub use compute::{
    ComputeDevice, ComputeProgram, DispatchArgs, DispatchError, ThreadGroupSize, SHADER_PROFILE,
};
pub use config::DeviceConfig;
pub use descriptor_allocator::{
    DescriptorHandleAllocator, DescriptorHandles, DESCRIPTOR_ALLOCATOR_CAPACITY,
};
pub use device::{
    CommandAllocator, CommandList, CommandListType, CommandQueue, CompileError, DescriptorHeap,
    Device, DeviceError, ShaderCompiler,
};
pub use dispatch_data::{DispatchArrays, DispatchData};
pub use pools::{CommandAllocatorPool, CommandListBundle, CommandListPool};
