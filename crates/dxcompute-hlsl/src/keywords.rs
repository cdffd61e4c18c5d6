//! Escaping of host identifiers that collide with reserved HLSL words.
//!
//! The set only holds words that are valid host identifiers but reserved in HLSL and that the
//! lowered method bodies never use with their HLSL meaning. Built-in type names (`float4`, ...)
//! and statement keywords shared with the host language are absent: rewriting them
//! inside a body would break the body itself.

use std::borrow::Cow;
use std::sync::OnceLock;

use hashbrown::HashSet;
use regex::Regex;

/// Prefix applied to escaped identifiers.
pub const RESERVED_PREFIX: &str = "__reserved__";

pub static KNOWN_KEYWORDS: &[&str] = &[
    "AppendStructuredBuffer",
    "asm",
    "asm_fragment",
    "BlendState",
    "Buffer",
    "ByteAddressBuffer",
    "cbuffer",
    "centroid",
    "class",
    "column_major",
    "compile",
    "compile_fragment",
    "CompileShader",
    "ComputeShader",
    "ConsumeStructuredBuffer",
    "DepthStencilState",
    "DepthStencilView",
    "discard",
    "DomainShader",
    "dword",
    "export",
    "fxgroup",
    "GeometryShader",
    "groupshared",
    "half",
    "Hullshader",
    "inline",
    "inout",
    "InputPatch",
    "interface",
    "line",
    "lineadj",
    "linear",
    "LineStream",
    "matrix",
    "min10float",
    "min12int",
    "min16float",
    "min16int",
    "min16uint",
    "namespace",
    "nointerpolation",
    "noperspective",
    "NULL",
    "out",
    "OutputPatch",
    "packoffset",
    "pass",
    "pixelfragment",
    "PixelShader",
    "point",
    "PointStream",
    "precise",
    "RasterizerState",
    "register",
    "RenderTargetView",
    "row_major",
    "RWBuffer",
    "RWByteAddressBuffer",
    "RWStructuredBuffer",
    "RWTexture1D",
    "RWTexture1DArray",
    "RWTexture2D",
    "RWTexture2DArray",
    "RWTexture3D",
    "sample",
    "sampler",
    "SamplerComparisonState",
    "SamplerState",
    "shared",
    "snorm",
    "stateblock",
    "stateblock_state",
    "string",
    "StructuredBuffer",
    "tbuffer",
    "technique",
    "technique10",
    "technique11",
    "texture",
    "Texture1D",
    "Texture1DArray",
    "Texture2D",
    "Texture2DArray",
    "Texture2DMS",
    "Texture2DMSArray",
    "Texture3D",
    "TextureCube",
    "TextureCubeArray",
    "triangle",
    "triangleadj",
    "TriangleStream",
    "typedef",
    "uniform",
    "unorm",
    "unsigned",
    "vector",
    "vertexfragment",
    "VertexShader",
    "void",
    "volatile",
];

fn keyword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| KNOWN_KEYWORDS.iter().copied().collect())
}

fn keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = KNOWN_KEYWORDS
            .iter()
            .map(|kw| regex::escape(kw))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"\b(?:{alternation})\b")).expect("keyword pattern is valid")
    })
}

/// Returns `true` if `identifier` is a reserved HLSL word.
pub fn is_reserved(identifier: &str) -> bool {
    keyword_set().contains(identifier)
}

/// Maps a single identifier, prefixing it with [`RESERVED_PREFIX`] if it is reserved.
pub fn escape_identifier(identifier: &str) -> Cow<'_, str> {
    if is_reserved(identifier) {
        Cow::Owned(format!("{RESERVED_PREFIX}{identifier}"))
    } else {
        Cow::Borrowed(identifier)
    }
}

/// Rewrites every reserved word occurring as a whole word in `text`.
///
/// Reapplying the rewrite is a no-op: the prefix ends in `_`, a word character, so an escaped
/// identifier never matches again.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    keyword_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{RESERVED_PREFIX}{}", &caps[0])
    })
}
