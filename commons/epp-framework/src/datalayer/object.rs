use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::InputType;
use crate::error::DataLayerError;

/// Group/version/kind of an externally stored resource.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build from an `apiVersion` (`v1` or `apps/v1`) and a kind.
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Parses `version/Kind` or `group/version/Kind`.
impl FromStr for Gvk {
    type Err = DataLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let gvk = match parts.as_slice() {
            [version, kind] => Gvk::new("", *version, *kind),
            [group, version, kind] => Gvk::new(*group, *version, *kind),
            _ => {
                return Err(DataLayerError::InvalidArgument(format!(
                    "kind `{}` must be `version/Kind` or `group/version/Kind`",
                    s
                )));
            }
        };
        if gvk.version.is_empty() || gvk.kind.is_empty() {
            return Err(DataLayerError::InvalidArgument(format!(
                "kind `{}` has an empty version or kind",
                s
            )));
        }
        Ok(gvk)
    }
}

/// Opaque structured document observed in the external store.
///
/// Owns its content: `clone()` produces a fully independent deep copy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unstructured(Map<String, Value>);

impl Unstructured {
    pub fn new(content: Map<String, Value>) -> Self {
        Self(content)
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn content_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// RFC 6901 lookup relative to the document root.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        if pointer.is_empty() {
            return None;
        }
        let (head, rest) = match pointer.strip_prefix('/') {
            Some(p) => match p.find('/') {
                Some(i) => (&p[..i], &p[i..]),
                None => (p, ""),
            },
            None => return None,
        };
        let head = head.replace("~1", "/").replace("~0", "~");
        let value = self.0.get(&head)?;
        if rest.is_empty() {
            Some(value)
        } else {
            value.pointer(rest)
        }
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.pointer(pointer).and_then(Value::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.str_at("/apiVersion")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_at("/kind")
    }

    pub fn gvk(&self) -> Option<Gvk> {
        Some(Gvk::from_api_version_kind(self.api_version()?, self.kind()?))
    }

    pub fn name(&self) -> Option<&str> {
        self.str_at("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_at("/metadata/namespace").filter(|ns| !ns.is_empty())
    }

    /// `<namespace>/<name>`, or just `<name>` for cluster-scoped objects.
    pub fn key(&self) -> Option<String> {
        let name = self.name()?;
        Some(match self.namespace() {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        })
    }
}

impl TryFrom<Value> for Unstructured {
    type Error = DataLayerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DataLayerError::InvalidArgument(format!(
                "unstructured content must be a JSON object, got {}",
                other
            ))),
        }
    }
}

/// Input type declared by extractors consuming [`Unstructured`] objects.
pub fn unstructured_type() -> InputType {
    InputType::of::<Unstructured>()
}
