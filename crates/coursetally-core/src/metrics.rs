//! # Metric Domain Table
//!
//! A metric's value domain (which values are legal, which counter rows
//! get seeded) is decided in exactly one place: the `MetricRegistry`.
//! Both the constraint checker and the counter-seeding logic inside
//! `RatingStore::apply` consult it, so the two can never disagree.

use crate::{MetricName, TallyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// METRIC KIND
// =============================================================================

/// The shape of a metric's value domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Rating-scale metric: integers 1 through 5.
    Scale,
    /// Boolean metric: 0 or 1.
    Binary,
}

impl MetricKind {
    /// The full category-value domain, in ascending order.
    ///
    /// This list is also the seeding list for lazily materialized
    /// counter rows.
    #[must_use]
    pub const fn domain(self) -> &'static [i64] {
        match self {
            Self::Scale => &[1, 2, 3, 4, 5],
            Self::Binary => &[0, 1],
        }
    }

    /// Whether `value` is a member of the domain.
    #[must_use]
    pub fn contains(self, value: i64) -> bool {
        self.domain().contains(&value)
    }
}

// =============================================================================
// METRIC REGISTRY
// =============================================================================

/// Lookup table from metric name to value domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRegistry {
    kinds: BTreeMap<MetricName, MetricKind>,
}

impl Default for MetricRegistry {
    /// The stock metric set: three rating-scale dimensions and one
    /// boolean recommendation flag.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MetricName::new("overall"), MetricKind::Scale);
        registry.register(MetricName::new("difficulty"), MetricKind::Scale);
        registry.register(MetricName::new("workload"), MetricKind::Scale);
        registry.register(MetricName::new("would_recommend"), MetricKind::Binary);
        registry
    }
}

impl MetricRegistry {
    /// Create a registry with no metrics.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// Declare a metric. Re-registering a name overwrites its kind.
    pub fn register(&mut self, name: MetricName, kind: MetricKind) {
        self.kinds.insert(name, kind);
    }

    /// The kind of a metric, if declared.
    #[must_use]
    pub fn kind_of(&self, name: &MetricName) -> Option<MetricKind> {
        self.kinds.get(name).copied()
    }

    /// The kind of a metric, or `BadInput` for undeclared names.
    pub fn require_kind(&self, name: &MetricName) -> Result<MetricKind, TallyError> {
        self.kind_of(name)
            .ok_or_else(|| TallyError::BadInput(format!("unknown metric '{}'", name.as_str())))
    }

    /// All declared metric names in deterministic order.
    pub fn names(&self) -> impl Iterator<Item = &MetricName> {
        self.kinds.keys()
    }

    /// Number of declared metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the registry declares no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn scale_domain_is_one_through_five() {
        assert_eq!(MetricKind::Scale.domain(), &[1, 2, 3, 4, 5]);
        assert!(MetricKind::Scale.contains(3));
        assert!(!MetricKind::Scale.contains(0));
        assert!(!MetricKind::Scale.contains(6));
    }

    #[test]
    fn binary_domain_is_zero_or_one() {
        assert_eq!(MetricKind::Binary.domain(), &[0, 1]);
        assert!(MetricKind::Binary.contains(0));
        assert!(!MetricKind::Binary.contains(2));
    }

    #[test]
    fn default_registry_declares_stock_metrics() {
        let registry = MetricRegistry::default();
        assert_eq!(
            registry.kind_of(&MetricName::new("difficulty")),
            Some(MetricKind::Scale)
        );
        assert_eq!(
            registry.kind_of(&MetricName::new("would_recommend")),
            Some(MetricKind::Binary)
        );
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn unknown_metric_is_bad_input() {
        let registry = MetricRegistry::default();
        let err = registry
            .require_kind(&MetricName::new("vibes"))
            .unwrap_err();
        assert!(matches!(err, TallyError::BadInput(_)));
    }

    #[test]
    fn re_registering_overwrites_kind() {
        let mut registry = MetricRegistry::empty();
        let name = MetricName::new("attendance");
        registry.register(name.clone(), MetricKind::Scale);
        registry.register(name.clone(), MetricKind::Binary);
        assert_eq!(registry.kind_of(&name), Some(MetricKind::Binary));
    }
}
