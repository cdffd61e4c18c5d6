//! Compile-time host -> HLSL mapping for values that can be uploaded as shader constants.

use bytemuck::{Pod, Zeroable};

/// A host value type with a fixed HLSL counterpart and identical byte layout.
///
/// `HOST_PATH` is the path the reflection layer reports for the type, so the closed mapping and
/// the string table in [`crate::known_types`] describe the same types.
pub trait HlslType: Pod {
    const HOST_PATH: &'static str;
    const HLSL_NAME: &'static str;
    const HLSL_SIZE: u32 = core::mem::size_of::<Self>() as u32;
}

/// HLSL `bool`: four bytes, zero is false.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Bool(u32);

impl Bool {
    pub const FALSE: Self = Self(0);
    pub const TRUE: Self = Self(1);

    pub fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bool {
    fn from(value: bool) -> Self {
        Self(value as u32)
    }
}

impl From<Bool> for bool {
    fn from(value: Bool) -> Self {
        value.get()
    }
}

macro_rules! hlsl_types {
    ($($ty:ty => $path:literal, $hlsl:literal;)*) => {
        $(
            impl HlslType for $ty {
                const HOST_PATH: &'static str = $path;
                const HLSL_NAME: &'static str = $hlsl;
            }
        )*
    };
}

hlsl_types! {
    Bool => "dxcompute_hlsl::Bool", "bool";
    i32 => "i32", "int";
    u32 => "u32", "uint";
    f32 => "f32", "float";
    f64 => "f64", "double";
    glam::IVec2 => "glam::IVec2", "int2";
    glam::IVec3 => "glam::IVec3", "int3";
    glam::IVec4 => "glam::IVec4", "int4";
    glam::UVec2 => "glam::UVec2", "uint2";
    glam::UVec3 => "glam::UVec3", "uint3";
    glam::UVec4 => "glam::UVec4", "uint4";
    glam::Vec2 => "glam::Vec2", "float2";
    glam::Vec3 => "glam::Vec3", "float3";
    glam::Vec4 => "glam::Vec4", "float4";
    glam::DVec2 => "glam::DVec2", "double2";
    glam::DVec3 => "glam::DVec3", "double3";
    glam::DVec4 => "glam::DVec4", "double4";
    glam::Mat4 => "glam::Mat4", "float4x4";
}

/// HLSL-only intrinsics, usable from host code.
///
/// The CPU implementations follow the HLSL definitions so host-side reference computations match
/// what the translated shader does.
pub struct Hlsl;

impl Hlsl {
    pub fn saturate(x: f32) -> f32 {
        x.clamp(0.0, 1.0)
    }

    pub fn step(edge: f32, x: f32) -> f32 {
        if x >= edge {
            1.0
        } else {
            0.0
        }
    }

    pub fn smoothstep(min: f32, max: f32, x: f32) -> f32 {
        let t = Self::saturate((x - min) / (max - min));
        t * t * (3.0 - 2.0 * t)
    }

    pub fn lerp(a: f32, b: f32, s: f32) -> f32 {
        a + (b - a) * s
    }

    pub fn rsqrt(x: f32) -> f32 {
        x.sqrt().recip()
    }
}
