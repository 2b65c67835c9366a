//! Resource type schemas.
//!
//! A provider declares one [`Schema`] per resource type and mode. The engine
//! uses schemas to decode and encode stored objects, to merge prior state
//! into configuration when re-planning, and to check provider results for
//! consistency.

use crate::addrs::{ProviderAddr, ResourceMode};
use crate::errors::{ProviderError, ValueError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    /// true or false
    Bool,
    /// any number
    Number,
    /// any string
    String,
    /// ordered list of one element type
    List(Box<AttrType>),
    /// string-keyed map of one element type
    Map(Box<AttrType>),
    /// object with fixed attribute types
    Object(BTreeMap<String, AttrType>),
    /// anything; decided by the value
    Dynamic,
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::List(elem) => write!(f, "list of {elem}"),
            Self::Map(elem) => write!(f, "map of {elem}"),
            Self::Object(_) => f.write_str("object"),
            Self::Dynamic => f.write_str("any value"),
        }
    }
}

/// One attribute declared by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The attribute's type
    pub ty: AttrType,
    /// Configuration must set this attribute.
    #[serde(default)]
    pub required: bool,
    /// Configuration may set this attribute.
    #[serde(default)]
    pub optional: bool,
    /// The provider may decide this attribute's value.
    #[serde(default)]
    pub computed: bool,
}

impl Attribute {
    /// A required attribute.
    pub const fn required(ty: AttrType) -> Self {
        Self {
            ty,
            required: true,
            optional: false,
            computed: false,
        }
    }

    /// An optional attribute.
    pub const fn optional(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: true,
            computed: false,
        }
    }

    /// An attribute only the provider sets.
    pub const fn computed(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: false,
            computed: true,
        }
    }

    /// An attribute configuration may set, and the provider decides
    /// otherwise.
    pub const fn optional_computed(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: true,
            computed: true,
        }
    }
}

/// The schema of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Incremented by the provider whenever the stored representation
    /// changes incompatibly.
    pub version: u64,
    /// The declared attributes.
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    /// A schema with the given version and no attributes.
    pub const fn new(version: u64) -> Self {
        Self {
            version,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, attr: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attr);
        self
    }

    /// The object type that values of this resource type have.
    pub fn implied_type(&self) -> AttrType {
        AttrType::Object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.ty.clone()))
                .collect(),
        )
    }

    /// Checks that an object value fits this schema.
    pub fn conform(&self, value: &Value) -> Result<(), ValueError> {
        value.conforms_to(&self.implied_type())
    }
}

/// Source of resource type schemas, usually the provider plugin library.
pub trait SchemaSource: Send + Sync {
    /// Returns the schema for a resource type of the given provider.
    fn resource_type_schema(
        &self,
        provider: &ProviderAddr,
        mode: ResourceMode,
        type_name: &str,
    ) -> Result<Arc<Schema>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_type_lists_every_attribute() {
        let schema = Schema::new(1)
            .with_attribute("id", Attribute::computed(AttrType::String))
            .with_attribute("ami", Attribute::required(AttrType::String));
        match schema.implied_type() {
            AttrType::Object(attrs) => {
                assert_eq!(attrs.len(), 2);
                assert_eq!(attrs["ami"], AttrType::String);
            }
            other => panic!("expected object type, got {other}"),
        }
    }

    #[test]
    fn conform_rejects_undeclared_attributes() {
        let schema = Schema::new(0).with_attribute("ami", Attribute::required(AttrType::String));
        let value = Value::object([("ami", Value::string("x")), ("extra", Value::Null)]);
        assert!(schema.conform(&value).is_err());
    }

    #[test]
    fn type_display_names_nested_types() {
        let ty = AttrType::List(Box::new(AttrType::Map(Box::new(AttrType::Number))));
        assert_eq!(ty.to_string(), "list of map of number");
    }

    #[test]
    fn attributes_deserialize_with_defaults() {
        let attr: Attribute = serde_json::from_str(r#"{"ty":"String","computed":true}"#).unwrap();
        assert_eq!(attr, Attribute::computed(AttrType::String));
    }
}
