//! Apply configuration.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Upper bound on concurrent provider calls made by the dispatcher.
///
/// Graph scheduling itself stays as concurrent as the dependency edges
/// allow; this only bounds how many plan, apply, read and open calls are in
/// flight against providers at once.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    default = 10,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct Parallelism(usize);

/// Settings for one apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Maximum concurrent provider calls.
    pub parallelism: Parallelism,
    /// Close ephemeral resources that are still open once every operation
    /// has finished, instead of leaving them to the provider to expire.
    pub close_leftover_ephemerals: bool,
}

impl ApplyConfig {
    /// Replaces the parallelism bound.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Enables or disables closing of leftover ephemeral resources.
    #[must_use]
    pub const fn with_close_leftover_ephemerals(mut self, close: bool) -> Self {
        self.close_leftover_ephemerals = close;
        self
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            parallelism: Parallelism::default(),
            close_leftover_ephemerals: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ApplyConfig::default();
        assert_eq!(usize::from(config.parallelism), 10);
        assert!(config.close_leftover_ephemerals);
    }

    #[test]
    fn parallelism_bounds_are_enforced() {
        assert!(Parallelism::try_new(0).is_err());
        assert!(Parallelism::try_new(1).is_ok());
        assert!(Parallelism::try_new(256).is_ok());
        assert!(Parallelism::try_new(257).is_err());
    }

    #[test]
    fn deserializes_partial_configuration() {
        let config: ApplyConfig = serde_json::from_str(r#"{"parallelism": 4}"#).unwrap();
        assert_eq!(usize::from(config.parallelism), 4);
        assert!(config.close_leftover_ephemerals);

        let err = serde_json::from_str::<ApplyConfig>(r#"{"parallelism": 0}"#);
        assert!(err.is_err());
    }
}
