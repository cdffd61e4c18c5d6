//! In-memory device, queue and compiler for exercising the dispatch path without a GPU.
//!
//! Command lists record what they are asked to do; the queue keeps a copy of every submitted
//! list's commands. Lists enforce the open/closed protocol: resetting an open list, closing a
//! closed one, or submitting an open one fails.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use dxcompute_d3d12ma::{HResult, NativeResource};

use crate::cache::CachedShader;
use crate::device::{
    BufferViewDesc, CommandAllocator, CommandList, CommandListType, CommandQueue, CompileError,
    CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType, Device,
    DeviceError, GpuDescriptorHandle, ShaderCompiler,
};

/// `DXGI_ERROR_DEVICE_REMOVED`.
pub const DEVICE_REMOVED: HResult = HResult(0x887A_0005_u32 as i32);

const DESCRIPTOR_INCREMENT: u32 = 32;
const HEAP_STRIDE: usize = 0x10_0000;
const GPU_HEAP_BASE: u64 = 0x1_0000_0000;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    /// CPU starts of the bound heaps.
    SetDescriptorHeaps(Vec<CpuDescriptorHandle>),
    /// Id of the bound pipeline.
    SetPipeline(u64),
    SetRootConstants {
        root_index: u32,
        words: Vec<u32>,
    },
    SetRootDescriptorTable {
        root_index: u32,
        base: GpuDescriptorHandle,
    },
    Dispatch(u32, u32, u32),
    CopyBufferRegion {
        dst: NativeResource,
        dst_offset: u64,
        src: NativeResource,
        src_offset: u64,
        bytes: u64,
    },
    Close,
}

#[derive(Debug, Default)]
struct Shared {
    next_id: AtomicU64,
    fail_resets: AtomicBool,
    allocator_resets: AtomicUsize,
    created_lists: AtomicUsize,
    live_lists: AtomicUsize,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn check_reset(&self) -> Result<(), DeviceError> {
        if self.fail_resets.load(Ordering::Relaxed) {
            Err(DeviceError::DeviceRemoved(DEVICE_REMOVED))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct MockCommandAllocator {
    resets: usize,
    shared: Arc<Shared>,
}

impl MockCommandAllocator {
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl CommandAllocator for MockCommandAllocator {
    fn reset(&mut self) -> Result<(), DeviceError> {
        self.shared.check_reset()?;
        self.resets += 1;
        self.shared.allocator_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockPipelineState {
    pub id: u64,
    pub bytecode: Vec<u8>,
    pub root_parameters: u32,
}

#[derive(Debug)]
pub struct MockDescriptorHeap {
    desc: DescriptorHeapDesc,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
}

impl MockDescriptorHeap {
    pub fn desc(&self) -> DescriptorHeapDesc {
        self.desc
    }
}

impl DescriptorHeap for MockDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start
    }
}

#[derive(Debug)]
pub struct MockCommandList {
    id: u64,
    ty: CommandListType,
    resets: usize,
    closed: bool,
    initial_pipeline: Option<u64>,
    commands: Vec<RecordedCommand>,
    shared: Arc<Shared>,
}

impl MockCommandList {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ty(&self) -> CommandListType {
        self.ty
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pipeline passed to the last create or reset.
    pub fn initial_pipeline(&self) -> Option<u64> {
        self.initial_pipeline
    }

    /// Commands recorded since the last reset.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    fn record(&mut self, command: RecordedCommand) {
        assert!(!self.closed, "recording into a closed command list");
        self.commands.push(command);
    }
}

impl Drop for MockCommandList {
    fn drop(&mut self) {
        self.shared.live_lists.fetch_sub(1, Ordering::Relaxed);
    }
}

impl CommandList for MockCommandList {
    type Allocator = MockCommandAllocator;
    type PipelineState = MockPipelineState;
    type DescriptorHeap = MockDescriptorHeap;

    fn reset(
        &mut self,
        _allocator: &mut MockCommandAllocator,
        pipeline_state: Option<&MockPipelineState>,
    ) -> Result<(), DeviceError> {
        self.shared.check_reset()?;
        if !self.closed {
            return Err(DeviceError::Native {
                op: "ID3D12GraphicsCommandList::Reset",
                hresult: HResult::E_INVALIDARG,
            });
        }
        self.closed = false;
        self.resets += 1;
        self.initial_pipeline = pipeline_state.map(|pipeline| pipeline.id);
        self.commands.clear();
        Ok(())
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&MockDescriptorHeap]) {
        let starts = heaps.iter().map(|heap| heap.cpu_start).collect();
        self.record(RecordedCommand::SetDescriptorHeaps(starts));
    }

    fn set_compute_pipeline(&mut self, pipeline_state: &MockPipelineState) {
        self.record(RecordedCommand::SetPipeline(pipeline_state.id));
    }

    fn set_compute_root_32bit_constants(&mut self, root_index: u32, words: &[u32]) {
        self.record(RecordedCommand::SetRootConstants {
            root_index,
            words: words.to_vec(),
        });
    }

    fn set_compute_root_descriptor_table(&mut self, root_index: u32, base: GpuDescriptorHandle) {
        self.record(RecordedCommand::SetRootDescriptorTable { root_index, base });
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.record(RecordedCommand::Dispatch(groups_x, groups_y, groups_z));
    }

    fn copy_buffer_region(
        &mut self,
        dst: NativeResource,
        dst_offset: u64,
        src: NativeResource,
        src_offset: u64,
        bytes: u64,
    ) {
        self.record(RecordedCommand::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            bytes,
        });
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Native {
                op: "ID3D12GraphicsCommandList::Close",
                hresult: HResult::E_INVALIDARG,
            });
        }
        self.record(RecordedCommand::Close);
        self.closed = true;
        Ok(())
    }
}

/// In-memory [`Device`] that counts what it creates.
#[derive(Debug, Default)]
pub struct MockDevice {
    shared: Arc<Shared>,
    heaps_created: AtomicUsize,
    pipelines_created: AtomicUsize,
    buffer_views: Mutex<Vec<(NativeResource, BufferViewDesc, CpuDescriptorHandle)>>,
    copied_descriptors: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every allocator and command list reset fail with `DeviceRemoved` until cleared.
    pub fn fail_resets(&self, fail: bool) {
        self.shared.fail_resets.store(fail, Ordering::Relaxed);
    }

    pub fn created_command_lists(&self) -> usize {
        self.shared.created_lists.load(Ordering::Relaxed)
    }

    /// Command lists created and not yet dropped.
    pub fn live_command_lists(&self) -> usize {
        self.shared.live_lists.load(Ordering::Relaxed)
    }

    /// Successful allocator resets across every allocator of this device.
    pub fn allocator_resets(&self) -> usize {
        self.shared.allocator_resets.load(Ordering::Relaxed)
    }

    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created.load(Ordering::Relaxed)
    }

    /// Every view written, in order, with the descriptor slot it was written to.
    pub fn buffer_views(&self) -> Vec<(NativeResource, BufferViewDesc, CpuDescriptorHandle)> {
        locked(&self.buffer_views).clone()
    }

    pub fn copied_descriptors(&self) -> usize {
        self.copied_descriptors.load(Ordering::Relaxed)
    }
}

impl Device for MockDevice {
    type CommandAllocator = MockCommandAllocator;
    type CommandList = MockCommandList;
    type PipelineState = MockPipelineState;
    type DescriptorHeap = MockDescriptorHeap;

    fn create_command_allocator(
        &self,
        _ty: CommandListType,
    ) -> Result<MockCommandAllocator, DeviceError> {
        Ok(MockCommandAllocator {
            resets: 0,
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_command_list(
        &self,
        ty: CommandListType,
        _allocator: &mut MockCommandAllocator,
        pipeline_state: Option<&MockPipelineState>,
    ) -> Result<MockCommandList, DeviceError> {
        self.shared.created_lists.fetch_add(1, Ordering::Relaxed);
        self.shared.live_lists.fetch_add(1, Ordering::Relaxed);
        Ok(MockCommandList {
            id: self.shared.next_id(),
            ty,
            resets: 0,
            closed: false,
            initial_pipeline: pipeline_state.map(|pipeline| pipeline.id),
            commands: Vec::new(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> Result<MockDescriptorHeap, DeviceError> {
        let n = self.heaps_created.fetch_add(1, Ordering::Relaxed) + 1;
        let cpu_start = CpuDescriptorHandle(n * HEAP_STRIDE);
        let gpu_start = desc
            .shader_visible
            .then(|| GpuDescriptorHandle(GPU_HEAP_BASE + cpu_start.0 as u64));
        Ok(MockDescriptorHeap {
            desc: *desc,
            cpu_start,
            gpu_start,
        })
    }

    fn descriptor_increment_size(&self, _ty: DescriptorHeapType) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn create_compute_pipeline(
        &self,
        shader: &CachedShader,
    ) -> Result<MockPipelineState, DeviceError> {
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(MockPipelineState {
            id: self.shared.next_id(),
            bytecode: shader.bytecode().to_vec(),
            root_parameters: shader.loader().root_parameter_count(),
        })
    }

    fn create_buffer_view(
        &self,
        resource: NativeResource,
        desc: &BufferViewDesc,
        dest: CpuDescriptorHandle,
    ) {
        locked(&self.buffer_views).push((resource, *desc, dest));
    }

    fn copy_descriptor(
        &self,
        _dest: CpuDescriptorHandle,
        _src: CpuDescriptorHandle,
        _ty: DescriptorHeapType,
    ) {
        self.copied_descriptors.fetch_add(1, Ordering::Relaxed);
    }
}

/// A snapshot of one submitted command list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub list_id: u64,
    pub initial_pipeline: Option<u64>,
    pub commands: Vec<RecordedCommand>,
}

/// Queue that completes every submission immediately.
#[derive(Debug, Default)]
pub struct MockQueue {
    submissions: Mutex<Vec<Submission>>,
    fail_next: Mutex<Option<DeviceError>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: DeviceError) {
        *locked(&self.fail_next) = Some(err);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        locked(&self.submissions).clone()
    }
}

impl CommandQueue<MockDevice> for MockQueue {
    fn execute_and_wait(&self, list: &MockCommandList) -> Result<(), DeviceError> {
        if let Some(err) = locked(&self.fail_next).take() {
            return Err(err);
        }
        if !list.closed {
            return Err(DeviceError::Native {
                op: "ID3D12CommandQueue::ExecuteCommandLists",
                hresult: HResult::E_INVALIDARG,
            });
        }
        locked(&self.submissions).push(Submission {
            list_id: list.id,
            initial_pipeline: list.initial_pipeline,
            commands: list.commands.clone(),
        });
        Ok(())
    }
}

/// Compiler that returns the source bytes behind a `DXIL` tag.
#[derive(Debug, Default)]
pub struct MockCompiler {
    delay: Option<Duration>,
    calls: AtomicUsize,
    sources: Mutex<Vec<String>>,
    fail_next: Mutex<Option<CompileError>>,
}

impl MockCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A compiler that sleeps for `delay` on every call.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, err: CompileError) {
        *locked(&self.fail_next) = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every source text passed to `compile`, in call order.
    pub fn sources(&self) -> Vec<String> {
        locked(&self.sources).clone()
    }
}

impl ShaderCompiler for MockCompiler {
    fn compile(
        &self,
        source: &str,
        entry_point: &str,
        profile: &str,
    ) -> Result<Vec<u8>, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.sources).push(source.to_owned());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Some(err) = locked(&self.fail_next).take() {
            return Err(err);
        }
        let mut bytecode = format!("DXIL {entry_point} {profile}\n").into_bytes();
        bytecode.extend_from_slice(source.as_bytes());
        Ok(bytecode)
    }
}
