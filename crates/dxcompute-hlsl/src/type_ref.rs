use std::fmt;

/// A host type reference as reported by the reflection layer.
///
/// `path` is the fully-qualified path without generic arguments (for example `glam::Vec4` or
/// `dxcompute_d3d12::ReadWriteBuffer`); generic arguments are kept in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub path: String,
    pub generic_args: Vec<TypeRef>,
}

impl TypeRef {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            generic_args: Vec::new(),
        }
    }

    pub fn generic(path: impl Into<String>, args: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            path: path.into(),
            generic_args: args.into_iter().collect(),
        }
    }

    /// Last segment of [`TypeRef::path`].
    pub fn short_name(&self) -> &str {
        self.path.rsplit("::").next().unwrap_or(&self.path)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if let Some((first, rest)) = self.generic_args.split_first() {
            write!(f, "<{first}")?;
            for arg in rest {
                write!(f, ", {arg}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}
