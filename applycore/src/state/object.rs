//! Resource instance objects, decoded and stored.

use crate::addrs::{object_label, DeposedKey, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::errors::StateError;
use crate::schema::Schema;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Whether an object can be trusted as a complete result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// The object was created or updated successfully.
    #[default]
    Ready,
    /// The provider made partial progress before reporting an error. The
    /// object exists remotely but must be replaced.
    Tainted,
}

/// The full decoded state of one resource instance object.
///
/// Objects are never mutated once published to a state store; changes
/// always install a new object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstanceObject {
    /// The object's attributes
    pub value: Value,
    /// Opaque data the provider asked to keep with the object
    pub private: Vec<u8>,
    /// Ready or tainted
    pub status: ObjectStatus,
    /// The provider instance that manages the object
    pub provider_instance_addr: ProviderInstanceAddr,
    /// The resource type name
    pub resource_type: String,
    /// The schema version the value conforms to
    pub schema_version: u64,
    /// Resource instances this object depended on when it was last changed
    pub dependencies: Vec<ResourceInstanceAddr>,
    /// Replacements create the new object before destroying this one.
    pub create_before_destroy: bool,
}

impl ResourceInstanceObject {
    /// Encodes the object for persistence. Fails if the value is not wholly
    /// known or does not conform to `schema`.
    pub fn encode(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
        schema: &Schema,
    ) -> Result<ObjectSrc, StateError> {
        let invalid = |source| StateError::InvalidValue {
            object: object_label(addr, deposed_key),
            source,
        };
        schema.conform(&self.value).map_err(invalid)?;
        let attributes = self.value.to_json().map_err(invalid)?;
        Ok(ObjectSrc {
            attributes,
            private: self.private.clone(),
            status: self.status,
            provider: self.provider_instance_addr.clone(),
            schema_version: schema.version,
            dependencies: self.dependencies.clone(),
            create_before_destroy: self.create_before_destroy,
        })
    }
}

/// The persisted form of a [`ResourceInstanceObject`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSrc {
    /// Attribute values as JSON
    pub attributes: serde_json::Value,
    /// Opaque provider-private data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private: Vec<u8>,
    /// Ready or tainted
    #[serde(default)]
    pub status: ObjectStatus,
    /// The provider instance that manages the object
    pub provider: ProviderInstanceAddr,
    /// Schema version the attributes were written with
    pub schema_version: u64,
    /// Dependencies recorded when the object was last changed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResourceInstanceAddr>,
    /// Create-before-destroy flag
    #[serde(default)]
    pub create_before_destroy: bool,
}

impl ObjectSrc {
    /// Decodes the stored object against the current schema of its resource
    /// type.
    pub fn decode(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
        schema: &Schema,
    ) -> Result<ResourceInstanceObject, StateError> {
        if self.schema_version != schema.version {
            return Err(StateError::SchemaVersionMismatch {
                object: object_label(addr, deposed_key),
                found: self.schema_version,
                expected: schema.version,
            });
        }
        let value =
            Value::from_json(&self.attributes, &schema.implied_type()).map_err(|source| StateError::InvalidValue {
                object: object_label(addr, deposed_key),
                source,
            })?;
        Ok(ResourceInstanceObject {
            value,
            private: self.private.clone(),
            status: self.status,
            provider_instance_addr: self.provider.clone(),
            resource_type: addr.resource_type.clone(),
            schema_version: self.schema_version,
            dependencies: self.dependencies.clone(),
            create_before_destroy: self.create_before_destroy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderAddr, ResourceMode};
    use crate::errors::ValueError;
    use crate::schema::{AttrType, Attribute};
    use proptest::prelude::*;

    fn schema() -> Schema {
        Schema::new(2)
            .with_attribute("id", Attribute::computed(AttrType::String))
            .with_attribute("size", Attribute::optional(AttrType::Number))
            .with_attribute("tags", Attribute::optional(AttrType::Map(Box::new(AttrType::String))))
    }

    fn addr() -> ResourceInstanceAddr {
        ResourceInstanceAddr::new(ResourceMode::Managed, "test_thing", "a").unwrap()
    }

    fn src(attributes: serde_json::Value, schema_version: u64) -> ObjectSrc {
        ObjectSrc {
            attributes,
            private: vec![1, 2, 3],
            status: ObjectStatus::Ready,
            provider: ProviderInstanceAddr::root(ProviderAddr::new("example.com", "test", "test")),
            schema_version,
            dependencies: vec![],
            create_before_destroy: false,
        }
    }

    #[test]
    fn decoding_rejects_other_schema_versions() {
        let err = src(serde_json::json!({"id": "x"}), 1)
            .decode(&addr(), DeposedKey::new(0xabcd), &schema())
            .unwrap_err();
        match err {
            StateError::SchemaVersionMismatch { object, found, expected } => {
                assert_eq!(object, "test_thing.a deposed object 0000abcd");
                assert_eq!((found, expected), (1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decoding_rejects_undeclared_attributes() {
        let err = src(serde_json::json!({"id": "x", "colour": "red"}), 2)
            .decode(&addr(), DeposedKey::NOT_DEPOSED, &schema())
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::InvalidValue {
                source: ValueError::UnexpectedAttribute { .. },
                ..
            }
        ));
    }

    #[test]
    fn encoding_rejects_unknown_values() {
        let obj = src(serde_json::json!({"id": "x", "size": 1, "tags": null}), 2)
            .decode(&addr(), DeposedKey::NOT_DEPOSED, &schema())
            .unwrap();
        let obj = ResourceInstanceObject {
            value: Value::object([("id", Value::Unknown)]),
            ..obj
        };
        let err = obj.encode(&addr(), DeposedKey::NOT_DEPOSED, &schema()).unwrap_err();
        assert!(err.to_string().contains(".id: value is not yet known"));
    }

    proptest! {
        #[test]
        fn untouched_objects_survive_decode_then_encode(
            id in "[a-z0-9-]{1,12}",
            size in proptest::option::of(any::<i32>()),
            tags in proptest::collection::btree_map("[a-z]{1,5}", "[a-z]{0,5}", 0..4),
        ) {
            let attributes = serde_json::json!({
                "id": id,
                "size": size,
                "tags": tags,
            });
            let stored = src(attributes, 2);
            let decoded = stored.decode(&addr(), DeposedKey::NOT_DEPOSED, &schema()).unwrap();
            let encoded = decoded.encode(&addr(), DeposedKey::NOT_DEPOSED, &schema()).unwrap();
            prop_assert_eq!(encoded, stored);
        }
    }
}
