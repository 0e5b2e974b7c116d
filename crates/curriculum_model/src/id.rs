//! Entity identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-assigned placeholder identifier.
///
/// A temporary id addresses an entity from the moment it is created in the
/// local document until the remote service acknowledges its creation.
/// Temporary ids are:
/// - Random (UUID v4), so two clients never collide
/// - Immutable once assigned
/// - Never sent to the remote service
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a new random temporary id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a temporary id from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic temporary id from a small number.
    ///
    /// Useful for fixtures that need stable ids across runs.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0.simple())
    }
}

impl From<Uuid> for TempId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

/// Authoritative identifier returned by the remote service.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({})", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a curriculum entity.
///
/// An entity is addressed by exactly one id at a time: a [`TempId`] before
/// its creation reached the server, a [`ServerId`] afterwards.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Id {
    /// Not yet acknowledged by the server.
    Temporary(TempId),
    /// Persisted remotely.
    Persisted(ServerId),
}

impl Id {
    /// Creates a fresh temporary id.
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(TempId::new())
    }

    /// Creates a persisted id.
    pub fn persisted(id: impl Into<String>) -> Self {
        Self::Persisted(ServerId::new(id))
    }

    /// Returns true if the entity has not reached the server yet.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns the temporary id, if any.
    #[must_use]
    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Self::Temporary(temp) => Some(*temp),
            Self::Persisted(_) => None,
        }
    }

    /// Returns the server id, if any.
    #[must_use]
    pub fn as_server(&self) -> Option<&ServerId> {
        match self {
            Self::Temporary(_) => None,
            Self::Persisted(server) => Some(server),
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(temp) => write!(f, "{temp:?}"),
            Self::Persisted(server) => write!(f, "{server:?}"),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(temp) => write!(f, "{temp}"),
            Self::Persisted(server) => write!(f, "{server}"),
        }
    }
}

impl From<TempId> for Id {
    fn from(temp: TempId) -> Self {
        Self::Temporary(temp)
    }
}

impl From<ServerId> for Id {
    fn from(server: ServerId) -> Self {
        Self::Persisted(server)
    }
}

/// The kind of entity an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A curriculum section.
    Section,
    /// A lesson inside a section.
    Lesson,
    /// The quiz attached to a section.
    Quiz,
    /// The course's flat metadata.
    Course,
}

impl EntityKind {
    /// Returns the lowercase name used in entity keys and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Section => "section",
            EntityKind::Lesson => "lesson",
            EntityKind::Quiz => "quiz",
            EntityKind::Course => "course",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping key for operations that address the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity id as carried by the operation.
    pub id: Id,
}

impl EntityKey {
    /// Creates a new entity key.
    #[must_use]
    pub fn new(kind: EntityKind, id: Id) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_temp_ids_are_unique() {
        assert_ne!(TempId::new(), TempId::new());
    }

    #[test]
    fn temporary_vs_persisted() {
        let temp = Id::temporary();
        assert!(temp.is_temporary());
        assert!(temp.as_temp().is_some());
        assert!(temp.as_server().is_none());

        let persisted = Id::persisted("sec-42");
        assert!(!persisted.is_temporary());
        assert_eq!(persisted.as_server().map(ServerId::as_str), Some("sec-42"));
    }

    #[test]
    fn entity_key_display() {
        let key = EntityKey::new(EntityKind::Lesson, Id::persisted("77"));
        assert_eq!(key.to_string(), "lesson:77");

        let temp = TempId::from_u128(1);
        let key = EntityKey::new(EntityKind::Section, temp.into());
        assert!(key.to_string().starts_with("section:tmp-"));
    }

    #[test]
    fn id_serde_shape() {
        let id = Id::persisted("abc");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!({"state": "persisted", "value": "abc"}));

        let back: Id = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }
}
