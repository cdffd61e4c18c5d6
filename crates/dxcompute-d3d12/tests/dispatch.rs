use std::sync::Arc;

use anyhow::Result;
use dxcompute_d3d12::test_utils::{MockCompiler, MockDevice, MockQueue, RecordedCommand};
use dxcompute_d3d12::{
    BufferKind, ComputeDevice, ComputeProgram, DeviceConfig, DispatchArgs, ReadOnlyBuffer,
    ReadWriteBuffer, ShaderCache, ThreadGroupSize, DESCRIPTOR_ALLOCATOR_CAPACITY,
};
use dxcompute_d3d12ma::test_utils::MockAllocatorLibrary;
use dxcompute_d3d12ma::{AdapterHandle, AllocatorFactory, DeviceHandle};
use dxcompute_hlsl::{ShaderSource, TypeRef};
use glam::Vec4;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn compute_device(
    library: &Arc<MockAllocatorLibrary>,
    config: DeviceConfig,
) -> Result<ComputeDevice<MockDevice, MockQueue>> {
    let allocator = AllocatorFactory::new(library.clone())?.create_allocator(
        DeviceHandle::from_raw(0x100).unwrap(),
        AdapterHandle::from_raw(0x200).unwrap(),
    )?;
    Ok(ComputeDevice::new(
        MockDevice::new(),
        MockQueue::new(),
        allocator,
        config,
    )?)
}

fn tint_program() -> Result<ComputeProgram> {
    Ok(ComputeProgram::from_builder(
        ShaderSource::builder()
            .field("pixels", ReadWriteBuffer::<Vec4>::type_ref())
            .field("source", ReadOnlyBuffer::<Vec4>::type_ref())
            .field("width", TypeRef::path("i32"))
            .field("tint", TypeRef::path("glam::Vec4"))
            .body(
                "int index = ThreadIds.y * width + ThreadIds.x;\n\
                 pixels[index] = source[index] * tint;",
            ),
    )?)
}

#[test]
fn dispatch_round_trip_returns_every_rented_object() -> Result<()> {
    init_tracing();
    let library = Arc::new(MockAllocatorLibrary::new());
    let device = compute_device(
        &library,
        DeviceConfig {
            command_list_prewarm: 2,
            ..DeviceConfig::default()
        },
    )?;
    assert_eq!(device.command_list_pool_len(), 2);

    let shaders = ShaderCache::new();
    let compiler = MockCompiler::new();
    let program = tint_program()?;
    let threads = ThreadGroupSize::new(8, 8, 1)?;

    {
        let pixels = device.create_buffer::<Vec4>(BufferKind::ReadWrite, 20 * 10)?;
        let source = device.create_buffer::<Vec4>(BufferKind::ReadOnly, 20 * 10)?;
        assert_eq!(
            device.descriptors().available(),
            DESCRIPTOR_ALLOCATOR_CAPACITY - 2
        );

        let args = DispatchArgs::new()
            .resource(&pixels)
            .resource(&source)
            .constant(20i32)
            .constant(Vec4::new(1.0, 0.5, 0.25, 1.0));
        device.dispatch(&shaders, &compiler, &program, [20, 10, 1], threads, &args)?;

        let submissions = device.queue().submissions();
        let commands = &submissions[0].commands;
        // width sits right after the extents; tint starts the next register.
        assert_eq!(
            commands[2],
            RecordedCommand::SetRootConstants {
                root_index: 0,
                words: vec![
                    20,
                    10,
                    1,
                    20,
                    1.0f32.to_bits(),
                    0.5f32.to_bits(),
                    0.25f32.to_bits(),
                    1.0f32.to_bits(),
                ],
            }
        );
        assert_eq!(commands[5], RecordedCommand::Dispatch(3, 2, 1));
        assert_eq!(commands.last(), Some(&RecordedCommand::Close));
    }

    // Buffers gave back their descriptor slots and allocations.
    assert_eq!(device.descriptors().available(), DESCRIPTOR_ALLOCATOR_CAPACITY);
    assert_eq!(library.live_resources(), 0);
    // The prewarmed list was reused and returned.
    assert_eq!(device.command_list_pool_len(), 2);
    assert_eq!(device.device().created_command_lists(), 2);
    for stats in [device.arrays().handles.stats(), device.arrays().words.stats()] {
        assert_eq!(stats.rented, stats.returned);
    }
    assert_eq!(compiler.calls(), 1);
    assert_eq!(shaders.stats().entries, 1);
    Ok(())
}

#[test]
fn shader_cache_is_shared_across_devices() -> Result<()> {
    init_tracing();
    let library = Arc::new(MockAllocatorLibrary::new());
    let shaders = ShaderCache::new();
    let compiler = MockCompiler::new();
    let program = tint_program()?;
    let threads = ThreadGroupSize::new(8, 8, 1)?;

    for _ in 0..2 {
        let device = compute_device(&library, DeviceConfig::default())?;
        let pixels = device.create_buffer::<Vec4>(BufferKind::ReadWrite, 64)?;
        let source = device.create_buffer::<Vec4>(BufferKind::ReadOnly, 64)?;
        let args = DispatchArgs::new()
            .resource(&pixels)
            .resource(&source)
            .constant(8i32)
            .constant(Vec4::ONE);
        device.dispatch(&shaders, &compiler, &program, [8, 8, 1], threads, &args)?;
        // Each device builds its own pipeline from the shared bytecode.
        assert_eq!(device.device().pipelines_created(), 1);
    }

    assert_eq!(compiler.calls(), 1);
    assert_eq!(shaders.stats().hits, 1);
    assert_eq!(library.live_allocators(), 0);
    Ok(())
}

#[test]
fn different_shapes_compile_separately() -> Result<()> {
    let library = Arc::new(MockAllocatorLibrary::new());
    let device = compute_device(&library, DeviceConfig::default())?;
    let shaders = ShaderCache::new();
    let compiler = MockCompiler::new();
    let program = tint_program()?;
    let pixels = device.create_buffer::<Vec4>(BufferKind::ReadWrite, 64)?;
    let source = device.create_buffer::<Vec4>(BufferKind::ReadOnly, 64)?;
    let args = DispatchArgs::new()
        .resource(&pixels)
        .resource(&source)
        .constant(8i32)
        .constant(Vec4::ONE);

    for (x, y) in [(8, 8), (16, 4), (8, 8)] {
        let threads = ThreadGroupSize::new(x, y, 1)?;
        device.dispatch(&shaders, &compiler, &program, [8, 8, 1], threads, &args)?;
    }

    assert_eq!(compiler.calls(), 2);
    let sources = compiler.sources();
    assert!(sources[1].starts_with("#define __GroupSize__get_X 16\n#define __GroupSize__get_Y 4\n"));
    assert_eq!(device.pipeline_stats().entries, 2);
    Ok(())
}
