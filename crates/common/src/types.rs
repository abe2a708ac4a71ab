use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one event stream: an order, a checkout guard, a customer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable ID from a namespace and a natural key.
    ///
    /// The same `(namespace, key)` pair always yields the same ID, so two
    /// processes racing to create the stream for one key collide on the
    /// store's version check instead of creating two streams.
    pub fn derived(namespace: &str, key: &str) -> Self {
        let name = format!("{namespace}:{key}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses the hyphenated or simple textual form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Hex form without hyphens, used when embedding the ID in references.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(AggregateId::new(), AggregateId::new());
    }

    #[test]
    fn test_derived_ids_are_stable_per_key() {
        let a = AggregateId::derived("checkout", "user=7;cart=abc");
        let b = AggregateId::derived("checkout", "user=7;cart=abc");
        let c = AggregateId::derived("checkout", "user=8;cart=abc");
        let d = AggregateId::derived("customer", "user=7;cart=abc");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_simple_form_parses_back() {
        let id = AggregateId::new();
        assert_eq!(id.simple().len(), 32);
        assert_eq!(AggregateId::parse(&id.simple()), Some(id));
        assert_eq!(AggregateId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_serializes_as_plain_uuid_string() {
        let id = AggregateId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
