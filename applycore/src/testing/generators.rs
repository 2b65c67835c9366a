//! Property test generators.
//!
//! Addresses generated here all belong to the fixture resource types, so
//! they can be fed straight into graphs run against
//! [`fixtures::plugins`](super::fixtures::plugins).

use super::fixtures;
use crate::addrs::{DeposedKey, InstanceKey, ResourceInstanceAddr};
use crate::value::Value;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Generates valid resource names.
pub fn arb_resource_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,10}"
}

/// Generates instance keys of every kind.
pub fn arb_instance_key() -> impl Strategy<Value = InstanceKey> {
    prop_oneof![
        Just(InstanceKey::None),
        (0_i64..16).prop_map(InstanceKey::Int),
        "[a-z]{1,6}".prop_map(InstanceKey::Str),
    ]
}

/// Generates `test_thing` instance addresses.
pub fn arb_managed_addr() -> impl Strategy<Value = ResourceInstanceAddr> {
    (arb_resource_name(), arb_instance_key()).prop_map(|(name, key)| fixtures::managed_addr(&name).with_key(key))
}

/// Generates between `min` and `max` distinct `test_thing` addresses, in
/// address order.
pub fn arb_distinct_managed_addrs(min: usize, max: usize) -> impl Strategy<Value = Vec<ResourceInstanceAddr>> {
    prop::collection::btree_set(arb_managed_addr(), min..=max).prop_map(|addrs: BTreeSet<_>| addrs.into_iter().collect())
}

/// Generates wholly known `test_thing` values.
pub fn arb_thing_value() -> impl Strategy<Value = Value> {
    ("[a-z0-9-]{1,12}", "[ -~]{0,16}").prop_map(|(id, name)| fixtures::thing_value(&id, &name))
}

/// Generates deposed keys, never [`DeposedKey::NOT_DEPOSED`].
pub fn arb_deposed_key() -> impl Strategy<Value = DeposedKey> {
    any::<u32>().prop_map(DeposedKey::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn distinct_addrs_really_are_distinct(addrs in arb_distinct_managed_addrs(1, 6)) {
            let unique: BTreeSet<_> = addrs.iter().collect();
            prop_assert_eq!(unique.len(), addrs.len());
            prop_assert!(!addrs.is_empty());
        }

        #[test]
        fn thing_values_conform_to_the_thing_schema(value in arb_thing_value()) {
            prop_assert!(fixtures::thing_schema().conform(&value).is_ok());
            prop_assert!(value.is_wholly_known());
        }
    }
}
