//! Assembles the HLSL template for a compute program from its captured fields and lowered body.

use std::fmt::Write as _;

use crate::error::SourceError;
use crate::keywords::{escape_identifier, escape_text};
use crate::known_types::{
    is_hlsl_value_type_name, mapped_type_name, resource_register_class, try_get_mapped_type,
    value_layout, RegisterClass,
};
use crate::layout::{ConstantBufferLayout, EXTENT_FIELDS};
use crate::TypeRef;

/// Entry point name of every generated program.
pub const ENTRY_POINT: &str = "Execute";

const GROUP_SIZE_DEFINES: [&str; 3] = [
    "__GroupSize__get_X",
    "__GroupSize__get_Y",
    "__GroupSize__get_Z",
];

/// A register-bound resource, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Host field name, before keyword escaping.
    pub name: String,
    pub hlsl_type: String,
    pub class: RegisterClass,
    /// Register index within `class` (`u#` / `t#`).
    pub register: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderReflection {
    pub resources: Vec<ResourceBinding>,
    pub constants: ConstantBufferLayout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSource {
    template: String,
    reflection: ShaderReflection,
}

impl ShaderSource {
    pub fn builder() -> ShaderSourceBuilder {
        ShaderSourceBuilder::default()
    }

    /// HLSL text without the thread-group defines. Program identity is interned from this text.
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Full HLSL text for one thread-group shape.
    pub fn render(&self, threads_x: u32, threads_y: u32, threads_z: u32) -> String {
        let mut out = String::with_capacity(self.template.len() + 128);
        for (define, value) in GROUP_SIZE_DEFINES
            .iter()
            .zip([threads_x, threads_y, threads_z])
        {
            let _ = writeln!(out, "#define {define} {value}");
        }
        out.push('\n');
        out.push_str(&self.template);
        out
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShaderSourceBuilder {
    fields: Vec<(String, TypeRef)>,
    body: String,
}

impl ShaderSourceBuilder {
    /// Declares a captured field. Resource types become register bindings, everything else a
    /// constant-buffer member.
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    /// Lowered HLSL statements of the program body, before keyword escaping.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<ShaderSource, SourceError> {
        if self.body.trim().is_empty() {
            return Err(SourceError::EmptyBody);
        }

        let mut constants = ConstantBufferLayout::builder();
        let mut resources = Vec::new();
        let mut next_uav = 0u32;
        let mut next_srv = 0u32;

        for (i, (name, ty)) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|(prev, _)| prev == name)
                || EXTENT_FIELDS.contains(&name.as_str())
            {
                return Err(SourceError::DuplicateField(name.clone()));
            }
            if is_hlsl_value_type_name(name) {
                return Err(SourceError::ReservedTypeName(name.clone()));
            }

            if let Some(class) = resource_register_class(&ty.path) {
                let element_is_value = ty.generic_args.first().is_some_and(|element| {
                    try_get_mapped_type(&element.path).is_some_and(|hlsl| value_layout(hlsl).is_some())
                });
                if !element_is_value {
                    return Err(SourceError::UnsupportedElementType {
                        field: name.clone(),
                        ty: ty.to_string(),
                    });
                }

                let counter = match class {
                    RegisterClass::Uav => &mut next_uav,
                    RegisterClass::Srv => &mut next_srv,
                };
                resources.push(ResourceBinding {
                    name: name.clone(),
                    hlsl_type: mapped_type_name(ty),
                    class,
                    register: *counter,
                });
                *counter += 1;
                continue;
            }

            let pushed = try_get_mapped_type(&ty.path)
                .and_then(|hlsl| constants.push_field(&escape_identifier(name), hlsl));
            if pushed.is_none() {
                return Err(SourceError::UnsupportedConstantType {
                    field: name.clone(),
                    ty: ty.to_string(),
                });
            }
        }

        let reflection = ShaderReflection {
            resources,
            constants: constants.build(),
        };
        let template = render_template(&reflection, &escape_text(&self.body));
        Ok(ShaderSource {
            template,
            reflection,
        })
    }
}

fn render_template(reflection: &ShaderReflection, body: &str) -> String {
    let mut out = String::new();

    out.push_str("cbuffer _ : register(b0)\n{\n");
    for field in reflection.constants.fields() {
        let _ = writeln!(out, "    {} {};", field.hlsl_type, field.name);
    }
    out.push_str("}\n\n");

    for resource in &reflection.resources {
        let _ = writeln!(
            out,
            "{} {} : register({}{});",
            resource.hlsl_type,
            escape_identifier(&resource.name),
            resource.class.register_prefix(),
            resource.register
        );
    }
    if !reflection.resources.is_empty() {
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "[numthreads({}, {}, {})]",
        GROUP_SIZE_DEFINES[0], GROUP_SIZE_DEFINES[1], GROUP_SIZE_DEFINES[2]
    );
    let _ = writeln!(
        out,
        "void {ENTRY_POINT}(uint3 ThreadIds : SV_DispatchThreadID, uint3 GroupThreadIds : SV_GroupThreadID)"
    );
    out.push_str("{\n");
    out.push_str("    if (ThreadIds.x < __x && ThreadIds.y < __y && ThreadIds.z < __z)\n");
    out.push_str("    {\n");
    for line in body.trim_end().lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "        {line}");
        }
    }
    out.push_str("    }\n}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rw(element: &str) -> TypeRef {
        TypeRef::generic("dxcompute_d3d12::ReadWriteBuffer", [TypeRef::path(element)])
    }

    fn ro(element: &str) -> TypeRef {
        TypeRef::generic("dxcompute_d3d12::ReadOnlyBuffer", [TypeRef::path(element)])
    }

    #[test]
    fn template_for_a_scaled_copy() {
        let source = ShaderSource::builder()
            .field("input", ro("f32"))
            .field("output", rw("f32"))
            .field("factor", TypeRef::path("f32"))
            .body("output[ThreadIds.x] = input[ThreadIds.x] * factor;")
            .build()
            .unwrap();

        let expected = "\
cbuffer _ : register(b0)
{
    uint __x;
    uint __y;
    uint __z;
    float factor;
}

StructuredBuffer<float> input : register(t0);
RWStructuredBuffer<float> output : register(u0);

[numthreads(__GroupSize__get_X, __GroupSize__get_Y, __GroupSize__get_Z)]
void Execute(uint3 ThreadIds : SV_DispatchThreadID, uint3 GroupThreadIds : SV_GroupThreadID)
{
    if (ThreadIds.x < __x && ThreadIds.y < __y && ThreadIds.z < __z)
    {
        output[ThreadIds.x] = input[ThreadIds.x] * factor;
    }
}
";
        assert_eq!(source.template(), expected);
    }

    #[test]
    fn registers_are_counted_per_class_in_declaration_order() {
        let source = ShaderSource::builder()
            .field("a", rw("f32"))
            .field("b", ro("glam::Vec4"))
            .field("c", rw("u32"))
            .field("d", ro("i32"))
            .body("a[0] = 1;")
            .build()
            .unwrap();

        let bindings: Vec<_> = source
            .reflection()
            .resources
            .iter()
            .map(|r| (r.name.as_str(), r.class.register_prefix(), r.register))
            .collect();
        assert_eq!(
            bindings,
            vec![("a", 'u', 0), ("b", 't', 0), ("c", 'u', 1), ("d", 't', 1)]
        );
        assert_eq!(source.reflection().resources[1].hlsl_type, "StructuredBuffer<float4>");
    }

    #[test]
    fn reserved_names_are_escaped_in_declarations_and_body() {
        let source = ShaderSource::builder()
            .field("line", rw("f32"))
            .field("sample", TypeRef::path("u32"))
            .body("line[ThreadIds.x] = sample;")
            .build()
            .unwrap();

        let template = source.template();
        assert!(template.contains("RWStructuredBuffer<float> __reserved__line : register(u0);"));
        assert!(template.contains("    uint __reserved__sample;"));
        assert!(template.contains("__reserved__line[ThreadIds.x] = __reserved__sample;"));
        // Reflection keeps the host name so callers can match their own fields.
        assert_eq!(source.reflection().resources[0].name, "line");
    }

    #[test]
    fn render_prepends_group_size_defines() {
        let source = ShaderSource::builder()
            .field("output", rw("u32"))
            .body("output[ThreadIds.x] = ThreadIds.x;")
            .build()
            .unwrap();

        let text = source.render(64, 2, 1);
        assert!(text.starts_with(
            "#define __GroupSize__get_X 64\n#define __GroupSize__get_Y 2\n#define __GroupSize__get_Z 1\n\n"
        ));
        assert!(text.ends_with(source.template()));
    }

    #[test]
    fn constants_follow_register_packing() {
        let source = ShaderSource::builder()
            .field("offset", TypeRef::path("glam::Vec2"))
            .field("transform", TypeRef::path("glam::Mat4"))
            .body("return;")
            .build()
            .unwrap();

        let constants = &source.reflection().constants;
        assert_eq!(constants.field("offset").unwrap().offset, 16);
        assert_eq!(constants.field("transform").unwrap().offset, 32);
        assert_eq!(constants.size_bytes(), 96);
    }

    #[test]
    fn rejects_invalid_programs() {
        let err = ShaderSource::builder().body("  \n").build().unwrap_err();
        assert_eq!(err, SourceError::EmptyBody);

        let err = ShaderSource::builder()
            .field("x", TypeRef::path("f32"))
            .field("x", TypeRef::path("u32"))
            .body("return;")
            .build()
            .unwrap_err();
        assert_eq!(err, SourceError::DuplicateField("x".into()));

        let err = ShaderSource::builder()
            .field("__y", TypeRef::path("f32"))
            .body("return;")
            .build()
            .unwrap_err();
        assert_eq!(err, SourceError::DuplicateField("__y".into()));

        let err = ShaderSource::builder()
            .field("float4", TypeRef::path("f32"))
            .body("return;")
            .build()
            .unwrap_err();
        assert_eq!(err, SourceError::ReservedTypeName("float4".into()));

        let err = ShaderSource::builder()
            .field("p", TypeRef::path("my_crate::Particle"))
            .body("return;")
            .build()
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedConstantType { .. }));

        let err = ShaderSource::builder()
            .field("p", rw("my_crate::Particle"))
            .body("return;")
            .build()
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedElementType { .. }));
    }
}
