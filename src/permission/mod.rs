//! Permission resolution
//!
//! A user's menus come from their active roles and from the active roles of
//! their department. Permission-type menus bind an HTTP method and a path
//! pattern; requests are authorized by matching their path against the
//! user's permission map for the request method.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::entity::ModeType;

pub mod guard;
pub mod matcher;
pub mod resolver;
pub mod routes;

pub use guard::{IsAuthenticated, RequestPermission};
pub use resolver::PermissionResolver;

/// Model label → visible field names
pub type FieldMap = BTreeMap<String, BTreeSet<String>>;

/// One permission-type menu reachable by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub path: String,
    pub menu_id: i64,
    pub model: Option<String>,
}

/// Path → (menu, model), kept in registration order.
///
/// Inserting an existing path replaces its value without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMap {
    entries: Vec<PermissionEntry>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, menu_id: i64, model: Option<String>) {
        let path = path.into();
        match self.entries.iter_mut().find(|e| e.path == path) {
            Some(entry) => {
                entry.menu_id = menu_id;
                entry.model = model;
            }
            None => self.entries.push(PermissionEntry {
                path,
                menu_id,
                model,
            }),
        }
    }

    pub fn get(&self, path: &str) -> Option<&PermissionEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A data permission rule-set in force for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRule {
    pub id: i64,
    pub name: String,
    pub mode: ModeType,
    pub rules: serde_json::Value,
}

/// Row-level rules applying to a user under one menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataRules {
    /// How `rules` combine: the user's mode for own rules, the department's otherwise
    pub mode: ModeType,
    pub rules: Vec<DataRule>,
}

impl UserDataRules {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_map_keeps_first_position() {
        let mut map = PermissionMap::new();
        map.insert("/api/book", 1, None);
        map.insert("/api/author", 2, None);
        map.insert("/api/book", 3, Some("demo.book".into()));
        let paths: Vec<&str> = map.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/api/book", "/api/author"]);
        assert_eq!(map.get("/api/book").map(|e| e.menu_id), Some(3));
    }

    #[test]
    fn test_permission_map_serializes_in_order() {
        let mut map = PermissionMap::new();
        map.insert("/z", 1, None);
        map.insert("/a", 2, None);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json[0]["path"], "/z");
        let back: PermissionMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
