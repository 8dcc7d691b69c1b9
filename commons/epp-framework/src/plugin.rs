use std::fmt;

/// Identity of a plugin instance.
///
/// `type` names the implementing family, `name` the configured instance.
/// Rendered as `<type>/<name>` in logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypedName {
    pub r#type: String,
    pub name: String,
}

impl TypedName {
    pub fn new(r#type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.r#type, self.name)
    }
}

/// Minimal shape shared by every pluggable unit.
pub trait Plugin: Send + Sync {
    fn typed_name(&self) -> TypedName;
}
