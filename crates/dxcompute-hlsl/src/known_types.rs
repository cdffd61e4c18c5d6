//! Host type -> HLSL type mapping.
//!
//! Lookups are exact matches on the fully-qualified host path. Types that are not in the tables
//! are not an error: they map to their own short name so user-defined types pass through.

use std::sync::OnceLock;

use hashbrown::HashMap;

use crate::TypeRef;

/// Register class a resource type binds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// Read-write resources (`u#`).
    Uav,
    /// Read-only resources (`t#`).
    Srv,
}

impl RegisterClass {
    pub fn register_prefix(self) -> char {
        match self {
            Self::Uav => 'u',
            Self::Srv => 't',
        }
    }
}

/// Value types, keyed by fully-qualified host path.
pub static KNOWN_TYPES: &[(&str, &str)] = &[
    ("bool", "bool"),
    ("i32", "int"),
    ("u32", "uint"),
    ("f32", "float"),
    ("f64", "double"),
    ("dxcompute_hlsl::Bool", "bool"),
    ("glam::BVec2", "bool2"),
    ("glam::BVec3", "bool3"),
    ("glam::BVec4", "bool4"),
    ("glam::IVec2", "int2"),
    ("glam::IVec3", "int3"),
    ("glam::IVec4", "int4"),
    ("glam::UVec2", "uint2"),
    ("glam::UVec3", "uint3"),
    ("glam::UVec4", "uint4"),
    ("glam::Vec2", "float2"),
    ("glam::Vec3", "float3"),
    ("glam::Vec3A", "float3"),
    ("glam::Vec4", "float4"),
    ("glam::DVec2", "double2"),
    ("glam::DVec3", "double3"),
    ("glam::DVec4", "double4"),
    ("glam::Mat2", "float2x2"),
    ("glam::Mat3", "float3x3"),
    ("glam::Mat4", "float4x4"),
    ("glam::DMat2", "double2x2"),
    ("glam::DMat3", "double3x3"),
    ("glam::DMat4", "double4x4"),
];

/// Resource types, keyed by fully-qualified host path.
pub static KNOWN_RESOURCE_TYPES: &[(&str, &str, RegisterClass)] = &[
    (
        "dxcompute_d3d12::ReadWriteBuffer",
        "RWStructuredBuffer",
        RegisterClass::Uav,
    ),
    (
        "dxcompute_d3d12::ReadOnlyBuffer",
        "StructuredBuffer",
        RegisterClass::Srv,
    ),
    (
        "dxcompute_d3d12::ReadWriteTexture2D",
        "RWTexture2D",
        RegisterClass::Uav,
    ),
    (
        "dxcompute_d3d12::ReadOnlyTexture2D",
        "Texture2D",
        RegisterClass::Srv,
    ),
    (
        "dxcompute_d3d12::ReadWriteTexture3D",
        "RWTexture3D",
        RegisterClass::Uav,
    ),
    (
        "dxcompute_d3d12::ReadOnlyTexture3D",
        "Texture3D",
        RegisterClass::Srv,
    ),
];

fn value_types() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| KNOWN_TYPES.iter().copied().collect())
}

fn resource_types() -> &'static HashMap<&'static str, (&'static str, RegisterClass)> {
    static MAP: OnceLock<HashMap<&'static str, (&'static str, RegisterClass)>> = OnceLock::new();
    MAP.get_or_init(|| {
        KNOWN_RESOURCE_TYPES
            .iter()
            .map(|&(path, hlsl, class)| (path, (hlsl, class)))
            .collect()
    })
}

/// Returns the HLSL name configured for `path` (value or resource type), if any.
pub fn try_get_mapped_type(path: &str) -> Option<&'static str> {
    value_types()
        .get(path)
        .copied()
        .or_else(|| resource_types().get(path).map(|&(hlsl, _)| hlsl))
}

/// Returns the register class for a known resource type.
pub fn resource_register_class(path: &str) -> Option<RegisterClass> {
    resource_types().get(path).map(|&(_, class)| class)
}

/// Maps a host type reference to HLSL text.
///
/// Generic arguments are mapped recursively, so
/// `dxcompute_d3d12::ReadWriteBuffer<glam::Vec4>` becomes `RWStructuredBuffer<float4>`.
pub fn mapped_type_name(ty: &TypeRef) -> String {
    let base = try_get_mapped_type(&ty.path).unwrap_or_else(|| ty.short_name());
    if ty.generic_args.is_empty() {
        return base.to_owned();
    }

    let args = ty
        .generic_args
        .iter()
        .map(mapped_type_name)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{base}<{args}>")
}

/// Size and alignment of an HLSL value type inside a constant buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueLayout {
    pub size: u32,
    /// Alignment of a single component (4 or 8 bytes).
    pub align: u32,
    /// Matrices always start on a fresh 16-byte register.
    pub register_aligned: bool,
}

/// Parses a built-in HLSL scalar/vector/matrix name (`float`, `uint3`, `float4x4`, ...).
///
/// Matrices use the default `column_major` packing: each column occupies its own register.
pub fn value_layout(hlsl_name: &str) -> Option<ValueLayout> {
    const SCALARS: &[(&str, u32)] = &[
        ("double", 8),
        ("float", 4),
        ("bool", 4),
        ("uint", 4),
        ("int", 4),
    ];

    // `uint` is listed before `int` so the longest scalar name wins.
    let (component_size, suffix) = SCALARS
        .iter()
        .find_map(|&(name, size)| hlsl_name.strip_prefix(name).map(|suffix| (size, suffix)))?;

    let dim = |s: &str| -> Option<u32> {
        match s {
            "1" => Some(1),
            "2" => Some(2),
            "3" => Some(3),
            "4" => Some(4),
            _ => None,
        }
    };

    if suffix.is_empty() {
        return Some(ValueLayout {
            size: component_size,
            align: component_size,
            register_aligned: false,
        });
    }

    if let Some((rows, cols)) = suffix.split_once('x') {
        let rows = dim(rows)?;
        let cols = dim(cols)?;
        let column_bytes = rows * component_size;
        let column_stride = column_bytes.div_ceil(16) * 16;
        return Some(ValueLayout {
            size: (cols - 1) * column_stride + column_bytes,
            align: component_size,
            register_aligned: true,
        });
    }

    let components = dim(suffix)?;
    Some(ValueLayout {
        size: components * component_size,
        align: component_size,
        register_aligned: false,
    })
}

/// Returns `true` if `name` spells a built-in HLSL value type.
pub fn is_hlsl_value_type_name(name: &str) -> bool {
    value_layout(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_configured_type_maps_to_configured_text() {
        for &(path, hlsl) in KNOWN_TYPES {
            assert_eq!(try_get_mapped_type(path), Some(hlsl), "{path}");
        }
        for &(path, hlsl, _) in KNOWN_RESOURCE_TYPES {
            assert_eq!(try_get_mapped_type(path), Some(hlsl), "{path}");
        }
    }

    #[test]
    fn unknown_types_fall_back_to_short_name() {
        assert_eq!(try_get_mapped_type("my_crate::Particle"), None);
        assert_eq!(
            mapped_type_name(&TypeRef::path("my_crate::Particle")),
            "Particle"
        );
    }

    #[test]
    fn lookup_is_exact_on_the_full_path() {
        // A matching short name in another crate is not a known type.
        assert_eq!(try_get_mapped_type("other::Vec4"), None);
        assert_eq!(mapped_type_name(&TypeRef::path("other::Vec4")), "Vec4");
    }

    #[test]
    fn generic_arguments_are_mapped_recursively() {
        let ty = TypeRef::generic(
            "dxcompute_d3d12::ReadWriteBuffer",
            [TypeRef::path("glam::Vec4")],
        );
        assert_eq!(mapped_type_name(&ty), "RWStructuredBuffer<float4>");

        let ty = TypeRef::generic(
            "dxcompute_d3d12::ReadOnlyBuffer",
            [TypeRef::path("my_crate::Particle")],
        );
        assert_eq!(mapped_type_name(&ty), "StructuredBuffer<Particle>");
    }

    #[test]
    fn register_classes() {
        assert_eq!(
            resource_register_class("dxcompute_d3d12::ReadWriteBuffer"),
            Some(RegisterClass::Uav)
        );
        assert_eq!(
            resource_register_class("dxcompute_d3d12::ReadOnlyBuffer"),
            Some(RegisterClass::Srv)
        );
        assert_eq!(resource_register_class("f32"), None);
    }

    #[test]
    fn value_layouts() {
        let l = |name| value_layout(name).map(|l| (l.size, l.align, l.register_aligned));
        assert_eq!(l("float"), Some((4, 4, false)));
        assert_eq!(l("uint3"), Some((12, 4, false)));
        assert_eq!(l("double"), Some((8, 8, false)));
        assert_eq!(l("double3"), Some((24, 8, false)));
        assert_eq!(l("float4x4"), Some((64, 4, true)));
        assert_eq!(l("float2x2"), Some((24, 4, true)));
        assert_eq!(l("float3x3"), Some((44, 4, true)));
        assert_eq!(l("double4x4"), Some((128, 8, true)));
        assert_eq!(l("float5"), None);
        assert_eq!(l("Particle"), None);
        assert_eq!(l("RWStructuredBuffer"), None);
    }

    #[test]
    fn every_known_value_type_has_a_layout() {
        for &(path, hlsl) in KNOWN_TYPES {
            assert!(value_layout(hlsl).is_some(), "{path} -> {hlsl}");
        }
    }
}
