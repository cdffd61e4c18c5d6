use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("captured field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("captured field `{field}` has type `{ty}` with no known HLSL constant layout")]
    UnsupportedConstantType { field: String, ty: String },
    #[error("resource `{field}` has element type `{ty}`, which is not an HLSL value type")]
    UnsupportedElementType { field: String, ty: String },
    #[error("captured field name `{0}` spells a built-in HLSL type")]
    ReservedTypeName(String),
    #[error("shader body is empty")]
    EmptyBody,
}
