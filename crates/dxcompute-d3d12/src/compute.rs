//! Dispatch orchestration.
//!
//! A dispatch walks: shader key -> compiled shader (process-wide cache) -> pipeline (per-device
//! cache) -> packed constants and resource handles -> pooled command list -> record -> close ->
//! execute and wait -> return the list to the pool.

use std::sync::Arc;

use dxcompute_d3d12ma::Allocator;
use dxcompute_hlsl::layout::EXTENT_FIELDS;
use dxcompute_hlsl::{HlslType, ShaderSource, ShaderSourceBuilder, SourceError, ENTRY_POINT};
use thiserror::Error;
use tracing::{debug, trace};

use crate::buffer::{BufferError, BufferKind, DeviceBuffer};
use crate::cache::{
    CacheStats, CachedShader, OnceCache, ShaderCache, ShaderIdentity, ShaderKey, ShaderLoader,
    CONSTANTS_ROOT_INDEX,
};
use crate::config::DeviceConfig;
use crate::descriptor_allocator::DescriptorHandleAllocator;
use crate::device::{
    CommandList, CommandListType, CommandQueue, CompileError, Device, DeviceError,
    GpuDescriptorHandle, ShaderCompiler,
};
use crate::dispatch_data::{DispatchArrays, DispatchData};
use crate::pools::{CommandAllocatorPool, CommandListPool};
use crate::sync::{lock, Mutex};

/// Compilation target of every program.
pub const SHADER_PROFILE: &str = "cs_6_0";

const MAX_THREADS_PER_GROUP: u32 = 1024;
const MAX_THREADS_Z: u32 = 64;
const MAX_GROUPS_PER_DIMENSION: u32 = 65535;
/// Root signature budget shared by the root constants and one table per resource.
const MAX_ROOT_DWORDS: u32 = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("invalid dispatch arguments: {0}")]
    Arguments(String),
    #[error("invalid thread group size {x}x{y}x{z}")]
    InvalidThreadGroup { x: u32, y: u32, z: u32 },
}

/// `[numthreads(x, y, z)]` of a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadGroupSize {
    x: u32,
    y: u32,
    z: u32,
}

impl ThreadGroupSize {
    /// Every dimension must be non-zero, `z` at most 64 and the product at most 1024.
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self, DispatchError> {
        let total = u64::from(x) * u64::from(y) * u64::from(z);
        if total == 0 || total > u64::from(MAX_THREADS_PER_GROUP) || z > MAX_THREADS_Z {
            return Err(DispatchError::InvalidThreadGroup { x, y, z });
        }
        Ok(Self { x, y, z })
    }

    pub fn x(self) -> u32 {
        self.x
    }

    pub fn y(self) -> u32 {
        self.y
    }

    pub fn z(self) -> u32 {
        self.z
    }

    /// Groups needed to cover `extents`, rounding up per axis.
    pub fn group_counts(self, extents: [u32; 3]) -> [u32; 3] {
        [
            extents[0].div_ceil(self.x),
            extents[1].div_ceil(self.y),
            extents[2].div_ceil(self.z),
        ]
    }
}

/// A program's HLSL source and identity, computed once when the program is defined.
#[derive(Clone, Debug)]
pub struct ComputeProgram {
    source: ShaderSource,
    identity: ShaderIdentity,
}

impl ComputeProgram {
    pub fn new(source: ShaderSource) -> Self {
        let identity = ShaderIdentity::of_source(source.template());
        Self { source, identity }
    }

    pub fn from_builder(builder: ShaderSourceBuilder) -> Result<Self, SourceError> {
        builder.build().map(Self::new)
    }

    pub fn source(&self) -> &ShaderSource {
        &self.source
    }

    pub fn identity(&self) -> ShaderIdentity {
        self.identity
    }
}

struct ConstantArg {
    hlsl_type: &'static str,
    bytes: Vec<u8>,
}

/// Bound resources and constant values of one dispatch, both in declaration order.
pub struct DispatchArgs<'a, D: Device> {
    resources: Vec<&'a DeviceBuffer<D>>,
    constants: Vec<ConstantArg>,
}

impl<D: Device> Default for DispatchArgs<'_, D> {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            constants: Vec::new(),
        }
    }
}

impl<'a, D: Device> DispatchArgs<'a, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, buffer: &'a DeviceBuffer<D>) -> Self {
        self.resources.push(buffer);
        self
    }

    pub fn constant<T: HlslType>(mut self, value: T) -> Self {
        self.constants.push(ConstantArg {
            hlsl_type: T::HLSL_NAME,
            bytes: bytemuck::bytes_of(&value).to_vec(),
        });
        self
    }
}

/// A device plus everything a dispatch rents: command lists, descriptor slots and packing
/// arrays, and the per-device pipeline cache.
pub struct ComputeDevice<D: Device, Q: CommandQueue<D>> {
    device: D,
    queue: Q,
    allocator: Allocator,
    config: DeviceConfig,
    command_lists: CommandListPool<D>,
    copy_allocators: CommandAllocatorPool<D>,
    copy_list: Mutex<Option<D::CommandList>>,
    descriptors: Arc<DescriptorHandleAllocator<D>>,
    pipelines: OnceCache<ShaderKey, Arc<D::PipelineState>>,
    arrays: DispatchArrays,
}

impl<D: Device, Q: CommandQueue<D>> ComputeDevice<D, Q> {
    pub fn new(
        device: D,
        queue: Q,
        allocator: Allocator,
        config: DeviceConfig,
    ) -> Result<Self, DeviceError> {
        let descriptors = Arc::new(DescriptorHandleAllocator::new(&device)?);
        let command_lists = CommandListPool::new(CommandListType::Compute);
        command_lists.prewarm(&device, config.command_list_prewarm)?;
        debug!(?config, uma = allocator.is_uma(), "created compute device");

        Ok(Self {
            device,
            queue,
            allocator,
            config,
            command_lists,
            copy_allocators: CommandAllocatorPool::new(CommandListType::Copy),
            copy_list: Mutex::new(None),
            descriptors,
            pipelines: OnceCache::default(),
            arrays: DispatchArrays::new(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &DescriptorHandleAllocator<D> {
        &self.descriptors
    }

    pub fn arrays(&self) -> &DispatchArrays {
        &self.arrays
    }

    /// Idle command lists in the compute pool.
    pub fn command_list_pool_len(&self) -> usize {
        self.command_lists.len()
    }

    pub fn pipeline_stats(&self) -> CacheStats {
        self.pipelines.stats()
    }

    pub fn create_buffer<T: HlslType>(
        &self,
        kind: BufferKind,
        len: usize,
    ) -> Result<DeviceBuffer<D>, BufferError> {
        DeviceBuffer::new::<T>(&self.device, &self.allocator, &self.descriptors, kind, len)
    }

    /// Copies the whole of `src` into `dst` on the copy queue and waits for completion.
    pub fn copy_buffer(
        &self,
        dst: &DeviceBuffer<D>,
        src: &DeviceBuffer<D>,
    ) -> Result<(), DispatchError> {
        if dst.size_bytes() != src.size_bytes() {
            return Err(DispatchError::Arguments(format!(
                "copy between buffers of {} and {} bytes",
                src.size_bytes(),
                dst.size_bytes()
            )));
        }

        let mut allocator = self.copy_allocators.rent(&self.device)?;
        let pooled = lock(&self.copy_list).take();
        let mut list = match pooled {
            Some(mut list) => {
                list.reset(&mut allocator, None)?;
                list
            }
            None => self
                .device
                .create_command_list(CommandListType::Copy, &mut allocator, None)?,
        };

        list.copy_buffer_region(dst.resource(), 0, src.resource(), 0, src.size_bytes());
        list.close()?;
        self.queue.execute_and_wait(&list)?;
        trace!(bytes = src.size_bytes(), "copied buffer");

        self.copy_allocators.give_back(allocator);
        *lock(&self.copy_list) = Some(list);
        Ok(())
    }

    /// Runs `program` over `extents` threads, `threads` per group, and waits for completion.
    ///
    /// Zero extents on any axis make this a no-op. On failure the rented command list is
    /// dropped rather than pooled.
    pub fn dispatch<C: ShaderCompiler + ?Sized>(
        &self,
        shaders: &ShaderCache,
        compiler: &C,
        program: &ComputeProgram,
        extents: [u32; 3],
        threads: ThreadGroupSize,
        args: &DispatchArgs<'_, D>,
    ) -> Result<(), DispatchError> {
        if extents.contains(&0) {
            trace!(?extents, "skipping empty dispatch");
            return Ok(());
        }
        self.validate(program, extents, threads, args)?;

        let key = ShaderKey::new(program.identity(), threads);
        let shader = shaders.get_or_add(key, || {
            let text = program.source().render(threads.x(), threads.y(), threads.z());
            let bytecode = compiler.compile(&text, ENTRY_POINT, SHADER_PROFILE)?;
            Ok::<_, CompileError>(CachedShader::new(
                ShaderLoader::new(program.source().reflection(), threads),
                bytecode,
            ))
        })?;
        let pipeline = self.pipelines.get_or_try_insert(&key, || {
            self.device.create_compute_pipeline(&shader).map(Arc::new)
        })?;

        let data = self.pack(program, extents, args);
        let groups = threads.group_counts(extents);

        let mut bundle = self.command_lists.rent(&self.device, Some(&*pipeline))?;
        let list = &mut bundle.list;
        list.set_descriptor_heaps(&[self.descriptors.shader_visible_heap()]);
        list.set_compute_pipeline(&pipeline);
        list.set_compute_root_32bit_constants(CONSTANTS_ROOT_INDEX, data.variables());
        for (i, &handle) in data.resources().iter().enumerate() {
            list.set_compute_root_descriptor_table(
                shader.loader().resource_root_index(i),
                GpuDescriptorHandle(handle),
            );
        }
        list.dispatch(groups[0], groups[1], groups[2]);
        list.close()?;
        self.queue.execute_and_wait(list)?;

        trace!(
            identity = key.identity.0,
            groups_x = groups[0],
            groups_y = groups[1],
            groups_z = groups[2],
            "dispatched"
        );
        self.command_lists.give_back(bundle);
        Ok(())
    }

    fn validate(
        &self,
        program: &ComputeProgram,
        extents: [u32; 3],
        threads: ThreadGroupSize,
        args: &DispatchArgs<'_, D>,
    ) -> Result<(), DispatchError> {
        let reflection = program.source().reflection();
        let constants = &reflection.constants;

        let groups = threads.group_counts(extents);
        if groups.iter().any(|&count| count > MAX_GROUPS_PER_DIMENSION) {
            return Err(DispatchError::Arguments(format!(
                "{groups:?} thread groups exceed {MAX_GROUPS_PER_DIMENSION} per dimension"
            )));
        }

        if constants.size_bytes() > self.config.constant_buffer_limit {
            return Err(DispatchError::Arguments(format!(
                "constant buffer of {} bytes exceeds the {} byte limit",
                constants.size_bytes(),
                self.config.constant_buffer_limit
            )));
        }
        let root_dwords = constants.size_words() + reflection.resources.len() as u32;
        if root_dwords > MAX_ROOT_DWORDS {
            return Err(DispatchError::Arguments(format!(
                "root signature needs {root_dwords} DWORDs, more than {MAX_ROOT_DWORDS}"
            )));
        }
        if args.resources.len() != reflection.resources.len() {
            return Err(DispatchError::Arguments(format!(
                "expected {} resources, got {}",
                reflection.resources.len(),
                args.resources.len()
            )));
        }
        let fields = constants.captured_fields();
        if args.constants.len() != fields.len() {
            return Err(DispatchError::Arguments(format!(
                "expected {} constants, got {}",
                fields.len(),
                args.constants.len()
            )));
        }

        for (field, arg) in fields.iter().zip(&args.constants) {
            if arg.bytes.len() != field.size as usize {
                return Err(DispatchError::Arguments(format!(
                    "constant {} is {} bytes, got {}",
                    field.name,
                    field.size,
                    arg.bytes.len()
                )));
            }
            if self.config.validation && arg.hlsl_type != field.hlsl_type {
                return Err(DispatchError::Arguments(format!(
                    "constant {} is {}, got {}",
                    field.name, field.hlsl_type, arg.hlsl_type
                )));
            }
        }

        if self.config.validation {
            for (binding, buffer) in reflection.resources.iter().zip(&args.resources) {
                if !buffer.matches_binding(binding.class, &binding.hlsl_type) {
                    return Err(DispatchError::Arguments(format!(
                        "resource {} is {}, got {}",
                        binding.name,
                        binding.hlsl_type,
                        buffer.hlsl_type()
                    )));
                }
            }
        }
        Ok(())
    }

    fn pack(
        &self,
        program: &ComputeProgram,
        extents: [u32; 3],
        args: &DispatchArgs<'_, D>,
    ) -> DispatchData<'_> {
        let constants = &program.source().reflection().constants;
        let mut data = DispatchData::rent(
            &self.arrays,
            args.resources.len(),
            constants.size_bytes() as usize,
        );

        for (name, extent) in EXTENT_FIELDS.iter().zip(extents) {
            if let Some(field) = constants.field(name) {
                data.write_value(field.offset as usize, &extent);
            }
        }
        for (field, arg) in constants.captured_fields().iter().zip(&args.constants) {
            data.write_variable(field.offset as usize, &arg.bytes);
        }
        for (slot, buffer) in data.resources_mut().iter_mut().zip(&args.resources) {
            *slot = buffer.gpu_handle().0;
        }
        data
    }
}
