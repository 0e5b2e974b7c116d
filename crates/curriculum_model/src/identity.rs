//! Temporary-to-server identity resolution.

use crate::id::{EntityKind, Id, ServerId, TempId};
use std::collections::HashMap;

/// Maps temporary ids to the server ids assigned on creation.
///
/// # Invariants
///
/// - Mappings only go temp → server; the map is never read backwards
/// - An entry is added the moment its create call returns a server id
/// - Entries are removed only when their owning section is deleted remotely
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    sections: HashMap<TempId, ServerId>,
    lessons: HashMap<TempId, ServerId>,
    quizzes: HashMap<TempId, ServerId>,
    /// Children created under each server section, for cleanup.
    children: HashMap<ServerId, Vec<(EntityKind, TempId)>>,
}

impl IdentityMap {
    /// Creates an empty identity map.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: EntityKind) -> Option<&HashMap<TempId, ServerId>> {
        match kind {
            EntityKind::Section => Some(&self.sections),
            EntityKind::Lesson => Some(&self.lessons),
            EntityKind::Quiz => Some(&self.quizzes),
            EntityKind::Course => None,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> Option<&mut HashMap<TempId, ServerId>> {
        match kind {
            EntityKind::Section => Some(&mut self.sections),
            EntityKind::Lesson => Some(&mut self.lessons),
            EntityKind::Quiz => Some(&mut self.quizzes),
            EntityKind::Course => None,
        }
    }

    /// Records the server id assigned to a created section.
    pub fn insert_section(&mut self, temp: TempId, server: ServerId) {
        self.sections.insert(temp, server);
    }

    /// Records the server id assigned to a created lesson or quiz, under
    /// the server id of its section.
    pub fn insert_child(
        &mut self,
        kind: EntityKind,
        section: &ServerId,
        temp: TempId,
        server: ServerId,
    ) {
        if let Some(table) = self.table_mut(kind) {
            table.insert(temp, server);
            self.children
                .entry(section.clone())
                .or_default()
                .push((kind, temp));
        }
    }

    /// Returns the server id recorded for a temporary id.
    #[must_use]
    pub fn get(&self, kind: EntityKind, temp: TempId) -> Option<&ServerId> {
        self.table(kind).and_then(|table| table.get(&temp))
    }

    /// Resolves an id to its server id.
    ///
    /// Persisted ids resolve to themselves; temporary ids resolve only once
    /// their create has succeeded.
    #[must_use]
    pub fn resolve(&self, kind: EntityKind, id: &Id) -> Option<ServerId> {
        match id {
            Id::Persisted(server) => Some(server.clone()),
            Id::Temporary(temp) => self.get(kind, *temp).cloned(),
        }
    }

    /// Returns true if the temporary id already has a server id.
    #[must_use]
    pub fn contains(&self, kind: EntityKind, temp: TempId) -> bool {
        self.get(kind, temp).is_some()
    }

    /// Drops the mapping of a deleted section and of every child created
    /// under it.
    pub fn forget_section(&mut self, section: &ServerId) {
        self.sections.retain(|_, server| server != section);
        if let Some(children) = self.children.remove(section) {
            for (kind, temp) in children {
                if let Some(table) = self.table_mut(kind) {
                    table.remove(&temp);
                }
            }
        }
    }

    /// Returns the total number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len() + self.lessons.len() + self.quizzes.len()
    }

    /// Returns true if no mapping has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
