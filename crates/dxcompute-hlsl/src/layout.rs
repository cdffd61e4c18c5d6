//! Constant-buffer packing.
//!
//! HLSL packs `cbuffer` members into 16-byte registers: a member never straddles a register
//! boundary, and matrices (plus anything larger than a register) start on a fresh register. The
//! dispatch extents always occupy the first three `uint` slots.

use crate::known_types::value_layout;

const REGISTER_BYTES: u32 = 16;

/// Names of the implicit dispatch-extent constants, in slot order.
pub const EXTENT_FIELDS: [&str; 3] = ["__x", "__y", "__z"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantField {
    pub name: String,
    pub hlsl_type: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantBufferLayout {
    fields: Vec<ConstantField>,
    size: u32,
}

impl ConstantBufferLayout {
    pub fn builder() -> ConstantBufferLayoutBuilder {
        ConstantBufferLayoutBuilder::new()
    }

    /// All members including the dispatch extents, in declaration order.
    pub fn fields(&self) -> &[ConstantField] {
        &self.fields
    }

    /// Members declared by the program (everything after the dispatch extents).
    pub fn captured_fields(&self) -> &[ConstantField] {
        &self.fields[EXTENT_FIELDS.len()..]
    }

    pub fn field(&self, name: &str) -> Option<&ConstantField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn size_bytes(&self) -> u32 {
        self.size
    }

    /// Number of 32-bit root constants needed to upload the buffer.
    pub fn size_words(&self) -> u32 {
        self.size.div_ceil(4)
    }
}

#[derive(Clone, Debug)]
pub struct ConstantBufferLayoutBuilder {
    fields: Vec<ConstantField>,
    cursor: u32,
}

impl ConstantBufferLayoutBuilder {
    fn new() -> Self {
        let mut builder = Self {
            fields: Vec::new(),
            cursor: 0,
        };
        for name in EXTENT_FIELDS {
            // `uint` always has a layout.
            builder.push(name, "uint", 4, 4, false);
        }
        builder
    }

    /// Appends `name` of HLSL value type `hlsl_type`. Returns `None` if the type has no known
    /// constant layout.
    pub fn push_field(&mut self, name: &str, hlsl_type: &str) -> Option<&ConstantField> {
        let layout = value_layout(hlsl_type)?;
        self.push(
            name,
            hlsl_type,
            layout.size,
            layout.align,
            layout.register_aligned,
        );
        self.fields.last()
    }

    fn push(&mut self, name: &str, hlsl_type: &str, size: u32, align: u32, register_aligned: bool) {
        let mut offset = self.cursor.next_multiple_of(align);
        if register_aligned || size > REGISTER_BYTES {
            offset = offset.next_multiple_of(REGISTER_BYTES);
        } else if offset / REGISTER_BYTES != (offset + size - 1) / REGISTER_BYTES {
            offset = offset.next_multiple_of(REGISTER_BYTES);
        }

        self.fields.push(ConstantField {
            name: name.to_owned(),
            hlsl_type: hlsl_type.to_owned(),
            offset,
            size,
        });
        self.cursor = offset + size;
    }

    pub fn build(self) -> ConstantBufferLayout {
        ConstantBufferLayout {
            fields: self.fields,
            size: self.cursor,
        }
    }
}
