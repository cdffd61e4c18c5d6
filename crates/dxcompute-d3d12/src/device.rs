//! The native device seam.
//!
//! These traits cover exactly the D3D12 surface the dispatch engine records against. A real
//! backend implements them over `ID3D12Device` and friends; [`crate::test_utils`] implements
//! them in memory.

use dxcompute_d3d12ma::{HResult, NativeResource};
use thiserror::Error;

use crate::cache::CachedShader;

/// `D3D12_CPU_DESCRIPTOR_HANDLE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle(pub usize);

impl CpuDescriptorHandle {
    pub fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

/// `D3D12_GPU_DESCRIPTOR_HANDLE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListType {
    Direct,
    Compute,
    Copy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub num_descriptors: u32,
    pub shader_visible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferViewKind {
    /// Unordered access view (`u#`).
    Uav,
    /// Shader resource view (`t#`).
    Srv,
}

/// Structured buffer view over a whole resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferViewDesc {
    pub kind: BufferViewKind,
    pub num_elements: u32,
    pub stride: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device removed (reason {0})")]
    DeviceRemoved(HResult),
    #[error("out of device memory")]
    OutOfMemory,
    #[error("{op} failed with {hresult}")]
    Native { op: &'static str, hresult: HResult },
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("shader compilation failed: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait CommandAllocator: Send {
    fn reset(&mut self) -> Result<(), DeviceError>;
}

pub trait DescriptorHeap: Send + Sync {
    fn cpu_start(&self) -> CpuDescriptorHandle;
    /// `None` for heaps that are not shader visible.
    fn gpu_start(&self) -> Option<GpuDescriptorHandle>;
}

/// A graphics command list. Lists are created open; `close` ends recording.
pub trait CommandList: Send {
    type Allocator: CommandAllocator;
    type PipelineState: Send + Sync;
    type DescriptorHeap: DescriptorHeap;

    fn reset(
        &mut self,
        allocator: &mut Self::Allocator,
        pipeline_state: Option<&Self::PipelineState>,
    ) -> Result<(), DeviceError>;

    fn set_descriptor_heaps(&mut self, heaps: &[&Self::DescriptorHeap]);

    /// Binds the pipeline and its root signature.
    fn set_compute_pipeline(&mut self, pipeline_state: &Self::PipelineState);

    fn set_compute_root_32bit_constants(&mut self, root_index: u32, words: &[u32]);

    fn set_compute_root_descriptor_table(&mut self, root_index: u32, base: GpuDescriptorHandle);

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    fn copy_buffer_region(
        &mut self,
        dst: NativeResource,
        dst_offset: u64,
        src: NativeResource,
        src_offset: u64,
        bytes: u64,
    );

    fn close(&mut self) -> Result<(), DeviceError>;
}

pub trait Device: Send + Sync {
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<
        Allocator = Self::CommandAllocator,
        PipelineState = Self::PipelineState,
        DescriptorHeap = Self::DescriptorHeap,
    >;
    type PipelineState: Send + Sync;
    type DescriptorHeap: DescriptorHeap;

    fn create_command_allocator(
        &self,
        ty: CommandListType,
    ) -> Result<Self::CommandAllocator, DeviceError>;

    /// Creates a list in the recording state.
    fn create_command_list(
        &self,
        ty: CommandListType,
        allocator: &mut Self::CommandAllocator,
        pipeline_state: Option<&Self::PipelineState>,
    ) -> Result<Self::CommandList, DeviceError>;

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> Result<Self::DescriptorHeap, DeviceError>;

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32;

    /// Builds the root signature described by `shader.loader()` and the pipeline over its
    /// bytecode.
    fn create_compute_pipeline(
        &self,
        shader: &CachedShader,
    ) -> Result<Self::PipelineState, DeviceError>;

    fn create_buffer_view(
        &self,
        resource: NativeResource,
        desc: &BufferViewDesc,
        dest: CpuDescriptorHandle,
    );

    fn copy_descriptor(
        &self,
        dest: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    );
}

/// Submission plus completion wait. The fence lives behind this trait.
pub trait CommandQueue<D: Device>: Send + Sync {
    fn execute_and_wait(&self, list: &D::CommandList) -> Result<(), DeviceError>;
}

/// External HLSL compiler (DXC or equivalent).
pub trait ShaderCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        entry_point: &str,
        profile: &str,
    ) -> Result<Vec<u8>, CompileError>;
}
