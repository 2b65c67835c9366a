//! The dynamic value model used for resource configuration and state.
//!
//! [`Value`] is deliberately small: it only needs to carry configuration,
//! planned values and states between the evaluator, the providers and the
//! state store. [`Value::Unknown`] marks a value that is not decided until
//! apply time. Unknown values can appear in plans but never in saved state.

use crate::errors::ValueError;
use crate::schema::AttrType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically-typed value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// A value that will only be known after apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(serde_json::Number),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// An object or map, keyed by attribute name.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Builds a number value from an integer.
    pub fn int(n: i64) -> Self {
        Self::Number(n.into())
    }

    /// Builds an object value.
    pub fn object<K: Into<String>>(attrs: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns true for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true unless this value itself is [`Value::Unknown`]. Nested
    /// unknowns are not considered; see [`Value::is_wholly_known`].
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Returns true if neither this value nor anything nested in it is
    /// unknown.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) => items.iter().all(Self::is_wholly_known),
            Self::Object(attrs) => attrs.values().all(Self::is_wholly_known),
            _ => true,
        }
    }

    /// Returns the named attribute of an object, or null when this is not
    /// an object or the attribute is absent.
    pub fn attr(&self, name: &str) -> &Self {
        const NULL: &Value = &Value::Null;
        match self {
            Self::Object(attrs) => attrs.get(name).unwrap_or(NULL),
            _ => NULL,
        }
    }

    /// A short name for the kind of value, used in error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unknown => "unknown value",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Converts a known value into JSON for persistence.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        self.to_json_at(&AttrPath::root())
    }

    fn to_json_at(&self, path: &AttrPath) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Unknown => {
                return Err(ValueError::Unknown {
                    path: path.to_string(),
                })
            }
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| item.to_json_at(&path.index(idx)))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(attrs) => serde_json::Value::Object(
                attrs
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json_at(&path.attr(k))?)))
                    .collect::<Result<_, ValueError>>()?,
            ),
        })
    }

    /// Decodes persisted JSON, guided by the expected type.
    ///
    /// Object types produce every declared attribute, with null standing in
    /// for attributes missing from the JSON.
    pub fn from_json(json: &serde_json::Value, ty: &AttrType) -> Result<Self, ValueError> {
        Self::from_json_at(json, ty, &AttrPath::root())
    }

    fn from_json_at(json: &serde_json::Value, ty: &AttrType, path: &AttrPath) -> Result<Self, ValueError> {
        use serde_json::Value as Json;

        let mismatch = |found: &'static str| ValueError::TypeMismatch {
            path: path.to_string(),
            expected: ty.to_string(),
            found,
        };

        Ok(match (ty, json) {
            (_, Json::Null) => Self::Null,
            (AttrType::Dynamic, _) => Self::from_untyped_json(json),
            (AttrType::Bool, Json::Bool(b)) => Self::Bool(*b),
            (AttrType::Number, Json::Number(n)) => Self::Number(n.clone()),
            (AttrType::String, Json::String(s)) => Self::String(s.clone()),
            (AttrType::List(elem), Json::Array(items)) => Self::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| Self::from_json_at(item, elem, &path.index(idx)))
                    .collect::<Result<_, _>>()?,
            ),
            (AttrType::Map(elem), Json::Object(entries)) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_json_at(v, elem, &path.key(k))?)))
                    .collect::<Result<_, ValueError>>()?,
            ),
            (AttrType::Object(attrs), Json::Object(entries)) => {
                if let Some(extra) = entries.keys().find(|k| !attrs.contains_key(*k)) {
                    return Err(ValueError::UnexpectedAttribute {
                        path: path.to_string(),
                        name: extra.clone(),
                    });
                }
                Self::Object(
                    attrs
                        .iter()
                        .map(|(name, attr_ty)| {
                            let value = match entries.get(name) {
                                Some(v) => Self::from_json_at(v, attr_ty, &path.attr(name))?,
                                None => Self::Null,
                            };
                            Ok((name.clone(), value))
                        })
                        .collect::<Result<_, ValueError>>()?,
                )
            }
            (_, Json::Bool(_)) => return Err(mismatch("bool")),
            (_, Json::Number(_)) => return Err(mismatch("number")),
            (_, Json::String(_)) => return Err(mismatch("string")),
            (_, Json::Array(_)) => return Err(mismatch("list")),
            (_, Json::Object(_)) => return Err(mismatch("object")),
        })
    }

    fn from_untyped_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::Number(n.clone()),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_untyped_json).collect()),
            Json::Object(entries) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_untyped_json(v)))
                    .collect(),
            ),
        }
    }

    /// Checks that this value fits the given type. Null and unknown fit
    /// every type.
    pub fn conforms_to(&self, ty: &AttrType) -> Result<(), ValueError> {
        self.conforms_at(ty, &AttrPath::root())
    }

    fn conforms_at(&self, ty: &AttrType, path: &AttrPath) -> Result<(), ValueError> {
        match (ty, self) {
            (_, Self::Null | Self::Unknown)
            | (AttrType::Dynamic, _)
            | (AttrType::Bool, Self::Bool(_))
            | (AttrType::Number, Self::Number(_))
            | (AttrType::String, Self::String(_)) => Ok(()),
            (AttrType::List(elem), Self::List(items)) => items
                .iter()
                .enumerate()
                .try_for_each(|(idx, item)| item.conforms_at(elem, &path.index(idx))),
            (AttrType::Map(elem), Self::Object(entries)) => entries
                .iter()
                .try_for_each(|(k, v)| v.conforms_at(elem, &path.key(k))),
            (AttrType::Object(attrs), Self::Object(entries)) => entries.iter().try_for_each(|(k, v)| {
                attrs.get(k).map_or_else(
                    || {
                        Err(ValueError::UnexpectedAttribute {
                            path: path.to_string(),
                            name: k.clone(),
                        })
                    },
                    |attr_ty| v.conforms_at(attr_ty, &path.attr(k)),
                )
            }),
            _ => Err(ValueError::TypeMismatch {
                path: path.to_string(),
                expected: ty.to_string(),
                found: self.kind_name(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Unknown => f.write_str("(known after apply)"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(attrs) => {
                f.write_str("{")?;
                for (idx, (k, v)) in attrs.iter().enumerate() {
                    if idx != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::int(n)
    }
}

/// A path to a nested value, used to point at problems in error messages.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttrPath(Vec<PathStep>);

#[derive(Debug, Clone)]
enum PathStep {
    Attr(String),
    Index(usize),
    Key(String),
}

impl AttrPath {
    pub(crate) const fn root() -> Self {
        Self(Vec::new())
    }

    fn with(&self, step: PathStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    pub(crate) fn attr(&self, name: &str) -> Self {
        self.with(PathStep::Attr(name.to_string()))
    }

    pub(crate) fn index(&self, idx: usize) -> Self {
        self.with(PathStep::Index(idx))
    }

    pub(crate) fn key(&self, key: &str) -> Self {
        self.with(PathStep::Key(key.to_string()))
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(root)");
        }
        for step in &self.0 {
            match step {
                PathStep::Attr(name) => write!(f, ".{name}")?,
                PathStep::Index(idx) => write!(f, "[{idx}]")?,
                PathStep::Key(key) => write!(f, "[{key:?}]")?,
            }
        }
        Ok(())
    }
}
