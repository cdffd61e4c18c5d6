//! GPU compute on Direct3D 12.
//!
//! - [`hlsl`]: HLSL source assembly, type/member translation and constant-buffer layout.
//! - [`d3d12`]: shader cache, pools, descriptor allocation and dispatch.
//! - [`d3d12ma`]: reference-counted bridge over the native memory allocator.

pub use dxcompute_d3d12 as d3d12;
pub use dxcompute_d3d12ma as d3d12ma;
pub use dxcompute_hlsl as hlsl;
