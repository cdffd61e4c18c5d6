//! Host method/property -> HLSL intrinsic mapping.
//!
//! Entries are keyed by `"<containing type path>::<member name>"`.

use std::sync::OnceLock;

use hashbrown::HashMap;

pub static KNOWN_MEMBERS: &[(&str, &str)] = &[
    // f32
    ("f32::abs", "abs"),
    ("f32::sqrt", "sqrt"),
    ("f32::sin", "sin"),
    ("f32::cos", "cos"),
    ("f32::tan", "tan"),
    ("f32::asin", "asin"),
    ("f32::acos", "acos"),
    ("f32::atan", "atan"),
    ("f32::atan2", "atan2"),
    ("f32::sinh", "sinh"),
    ("f32::cosh", "cosh"),
    ("f32::tanh", "tanh"),
    ("f32::exp", "exp"),
    ("f32::exp2", "exp2"),
    ("f32::ln", "log"),
    ("f32::log2", "log2"),
    ("f32::log10", "log10"),
    ("f32::powf", "pow"),
    ("f32::floor", "floor"),
    ("f32::ceil", "ceil"),
    ("f32::round", "round"),
    ("f32::trunc", "trunc"),
    ("f32::fract", "frac"),
    ("f32::min", "min"),
    ("f32::max", "max"),
    ("f32::clamp", "clamp"),
    ("f32::mul_add", "mad"),
    ("f32::signum", "sign"),
    ("f32::recip", "rcp"),
    ("f32::to_radians", "radians"),
    ("f32::to_degrees", "degrees"),
    ("f32::is_nan", "isnan"),
    ("f32::is_infinite", "isinf"),
    ("f32::is_finite", "isfinite"),
    // f64
    ("f64::abs", "abs"),
    ("f64::sqrt", "sqrt"),
    ("f64::floor", "floor"),
    ("f64::ceil", "ceil"),
    ("f64::min", "min"),
    ("f64::max", "max"),
    ("f64::clamp", "clamp"),
    ("f64::mul_add", "fma"),
    ("f64::recip", "rcp"),
    // integers
    ("i32::abs", "abs"),
    ("i32::min", "min"),
    ("i32::max", "max"),
    ("i32::clamp", "clamp"),
    ("i32::signum", "sign"),
    ("i32::count_ones", "countbits"),
    ("u32::min", "min"),
    ("u32::max", "max"),
    ("u32::clamp", "clamp"),
    ("u32::count_ones", "countbits"),
    ("u32::reverse_bits", "reversebits"),
    // glam vectors
    ("glam::Vec2::dot", "dot"),
    ("glam::Vec2::length", "length"),
    ("glam::Vec2::normalize", "normalize"),
    ("glam::Vec2::distance", "distance"),
    ("glam::Vec2::lerp", "lerp"),
    ("glam::Vec2::abs", "abs"),
    ("glam::Vec2::min", "min"),
    ("glam::Vec2::max", "max"),
    ("glam::Vec2::clamp", "clamp"),
    ("glam::Vec2::floor", "floor"),
    ("glam::Vec2::ceil", "ceil"),
    ("glam::Vec2::fract", "frac"),
    ("glam::Vec3::dot", "dot"),
    ("glam::Vec3::cross", "cross"),
    ("glam::Vec3::length", "length"),
    ("glam::Vec3::normalize", "normalize"),
    ("glam::Vec3::distance", "distance"),
    ("glam::Vec3::lerp", "lerp"),
    ("glam::Vec3::abs", "abs"),
    ("glam::Vec3::min", "min"),
    ("glam::Vec3::max", "max"),
    ("glam::Vec3::clamp", "clamp"),
    ("glam::Vec3::floor", "floor"),
    ("glam::Vec3::ceil", "ceil"),
    ("glam::Vec3::fract", "frac"),
    ("glam::Vec3::reflect", "reflect"),
    ("glam::Vec4::dot", "dot"),
    ("glam::Vec4::length", "length"),
    ("glam::Vec4::normalize", "normalize"),
    ("glam::Vec4::distance", "distance"),
    ("glam::Vec4::lerp", "lerp"),
    ("glam::Vec4::abs", "abs"),
    ("glam::Vec4::min", "min"),
    ("glam::Vec4::max", "max"),
    ("glam::Vec4::clamp", "clamp"),
    ("glam::Vec4::floor", "floor"),
    ("glam::Vec4::ceil", "ceil"),
    ("glam::Vec4::fract", "frac"),
    // glam matrices
    ("glam::Mat4::transpose", "transpose"),
    ("glam::Mat4::determinant", "determinant"),
    ("glam::Mat4::mul_vec4", "mul"),
    ("glam::Mat3::transpose", "transpose"),
    ("glam::Mat3::determinant", "determinant"),
    ("glam::Mat3::mul_vec3", "mul"),
    // HLSL-only intrinsics exposed on the host `Hlsl` type.
    ("dxcompute_hlsl::Hlsl::saturate", "saturate"),
    ("dxcompute_hlsl::Hlsl::step", "step"),
    ("dxcompute_hlsl::Hlsl::smoothstep", "smoothstep"),
    ("dxcompute_hlsl::Hlsl::lerp", "lerp"),
    ("dxcompute_hlsl::Hlsl::rsqrt", "rsqrt"),
    ("dxcompute_hlsl::Hlsl::all_memory_barrier", "AllMemoryBarrier"),
    (
        "dxcompute_hlsl::Hlsl::all_memory_barrier_with_group_sync",
        "AllMemoryBarrierWithGroupSync",
    ),
    ("dxcompute_hlsl::Hlsl::group_memory_barrier", "GroupMemoryBarrier"),
    (
        "dxcompute_hlsl::Hlsl::group_memory_barrier_with_group_sync",
        "GroupMemoryBarrierWithGroupSync",
    ),
    ("dxcompute_hlsl::Hlsl::interlocked_add", "InterlockedAdd"),
    ("dxcompute_hlsl::Hlsl::interlocked_min", "InterlockedMin"),
    ("dxcompute_hlsl::Hlsl::interlocked_max", "InterlockedMax"),
    ("dxcompute_hlsl::Hlsl::interlocked_exchange", "InterlockedExchange"),
    // Dispatch-time built-ins bound by the generated entry point.
    ("dxcompute_hlsl::ThreadIds::x", "ThreadIds.x"),
    ("dxcompute_hlsl::ThreadIds::y", "ThreadIds.y"),
    ("dxcompute_hlsl::ThreadIds::z", "ThreadIds.z"),
    ("dxcompute_hlsl::GroupThreadIds::x", "GroupThreadIds.x"),
    ("dxcompute_hlsl::GroupThreadIds::y", "GroupThreadIds.y"),
    ("dxcompute_hlsl::GroupThreadIds::z", "GroupThreadIds.z"),
    ("dxcompute_hlsl::DispatchSize::x", "__x"),
    ("dxcompute_hlsl::DispatchSize::y", "__y"),
    ("dxcompute_hlsl::DispatchSize::z", "__z"),
];

fn members() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| KNOWN_MEMBERS.iter().copied().collect())
}

fn member_key(containing: &str, member: &str) -> String {
    format!("{containing}::{member}")
}

/// Returns `true` if `containing::member` has an HLSL mapping.
pub fn is_known_method(containing: &str, member: &str) -> bool {
    members().contains_key(member_key(containing, member).as_str())
}

/// Returns the HLSL text configured for `containing::member`, or `None` for anything else.
pub fn try_get_mapped_name(containing: &str, member: &str) -> Option<&'static str> {
    members()
        .get(member_key(containing, member).as_str())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(key: &str) -> (&str, &str) {
        key.rsplit_once("::").expect("member keys contain a path separator")
    }

    #[test]
    fn every_configured_member_maps_to_configured_text() {
        for &(key, hlsl) in KNOWN_MEMBERS {
            let (containing, member) = split(key);
            assert!(is_known_method(containing, member), "{key}");
            assert_eq!(try_get_mapped_name(containing, member), Some(hlsl), "{key}");
        }
    }

    #[test]
    fn unconfigured_members_are_unknown() {
        assert!(!is_known_method("f32", "sin_cos"));
        assert_eq!(try_get_mapped_name("f32", "sin_cos"), None);
        assert_eq!(try_get_mapped_name("my_crate::Particle", "update"), None);
        // Members are scoped to their containing type.
        assert_eq!(try_get_mapped_name("u32", "abs"), None);
        assert_eq!(try_get_mapped_name("i32", "abs"), Some("abs"));
    }

    #[test]
    fn renamed_members() {
        assert_eq!(try_get_mapped_name("f32", "ln"), Some("log"));
        assert_eq!(try_get_mapped_name("f32", "mul_add"), Some("mad"));
        assert_eq!(try_get_mapped_name("f64", "mul_add"), Some("fma"));
        assert_eq!(
            try_get_mapped_name("dxcompute_hlsl::ThreadIds", "x"),
            Some("ThreadIds.x")
        );
    }

    #[test]
    fn member_keys_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for &(key, _) in KNOWN_MEMBERS {
            assert!(seen.insert(key), "duplicate member key {key}");
        }
    }
}
