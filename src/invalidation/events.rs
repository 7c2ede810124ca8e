//! Mutation events

use serde::Serialize;

use crate::entity::relation::RelationKind;
use crate::entity::user_info::UserField;

/// Phase of a many-to-many change, in emission order per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum M2mPhase {
    PreAdd,
    PostAdd,
    PreRemove,
    PostRemove,
}

/// Kind of record an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    Role,
    Dept,
    Menu,
    DataPermission,
    FieldPermission,
    SystemConfig,
    UserConfig,
    Relation(RelationKind),
}

/// A change to a record that permission or config data is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// `changed` lists the fields written; an empty list means a new user
    UserSaved { id: i64, changed: Vec<UserField> },
    UserDeleted { id: i64 },
    RoleSaved { id: i64 },
    RoleDeleted { id: i64 },
    DeptSaved { id: i64 },
    DeptDeleted { id: i64 },
    MenuSaved { id: i64 },
    MenuDeleted { id: i64 },
    RuleSaved { id: i64 },
    RuleDeleted { id: i64 },
    FieldPermissionSaved { id: i64, menu_id: i64 },
    FieldPermissionDeleted { id: i64, menu_id: i64 },
    SystemConfigSaved { key: String },
    SystemConfigDeleted { key: String },
    UserConfigSaved { owner_id: i64, key: String },
    UserConfigDeleted { owner_id: i64, key: String },
    M2m {
        kind: RelationKind,
        phase: M2mPhase,
        owner_id: i64,
        targets: Vec<i64>,
    },
}

impl ChangeEvent {
    pub fn source(&self) -> Source {
        match self {
            ChangeEvent::UserSaved { .. } | ChangeEvent::UserDeleted { .. } => Source::User,
            ChangeEvent::RoleSaved { .. } | ChangeEvent::RoleDeleted { .. } => Source::Role,
            ChangeEvent::DeptSaved { .. } | ChangeEvent::DeptDeleted { .. } => Source::Dept,
            ChangeEvent::MenuSaved { .. } | ChangeEvent::MenuDeleted { .. } => Source::Menu,
            ChangeEvent::RuleSaved { .. } | ChangeEvent::RuleDeleted { .. } => {
                Source::DataPermission
            }
            ChangeEvent::FieldPermissionSaved { .. } | ChangeEvent::FieldPermissionDeleted { .. } => {
                Source::FieldPermission
            }
            ChangeEvent::SystemConfigSaved { .. } | ChangeEvent::SystemConfigDeleted { .. } => {
                Source::SystemConfig
            }
            ChangeEvent::UserConfigSaved { .. } | ChangeEvent::UserConfigDeleted { .. } => {
                Source::UserConfig
            }
            ChangeEvent::M2m { kind, .. } => Source::Relation(*kind),
        }
    }

    /// Id of the record the event starts from; the owner for m2m changes
    pub fn subject_id(&self) -> Option<i64> {
        match self {
            ChangeEvent::UserSaved { id, .. }
            | ChangeEvent::UserDeleted { id }
            | ChangeEvent::RoleSaved { id }
            | ChangeEvent::RoleDeleted { id }
            | ChangeEvent::DeptSaved { id }
            | ChangeEvent::DeptDeleted { id }
            | ChangeEvent::MenuSaved { id }
            | ChangeEvent::MenuDeleted { id }
            | ChangeEvent::RuleSaved { id }
            | ChangeEvent::RuleDeleted { id }
            | ChangeEvent::FieldPermissionSaved { id, .. }
            | ChangeEvent::FieldPermissionDeleted { id, .. } => Some(*id),
            ChangeEvent::UserConfigSaved { owner_id, .. }
            | ChangeEvent::UserConfigDeleted { owner_id, .. }
            | ChangeEvent::M2m { owner_id, .. } => Some(*owner_id),
            ChangeEvent::SystemConfigSaved { .. } | ChangeEvent::SystemConfigDeleted { .. } => None,
        }
    }

    pub fn config_key(&self) -> Option<&str> {
        match self {
            ChangeEvent::SystemConfigSaved { key }
            | ChangeEvent::SystemConfigDeleted { key }
            | ChangeEvent::UserConfigSaved { key, .. }
            | ChangeEvent::UserConfigDeleted { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            ChangeEvent::UserDeleted { .. }
                | ChangeEvent::RoleDeleted { .. }
                | ChangeEvent::DeptDeleted { .. }
                | ChangeEvent::MenuDeleted { .. }
                | ChangeEvent::RuleDeleted { .. }
                | ChangeEvent::FieldPermissionDeleted { .. }
                | ChangeEvent::SystemConfigDeleted { .. }
                | ChangeEvent::UserConfigDeleted { .. }
        )
    }

    pub fn m2m_phase(&self) -> Option<M2mPhase> {
        match self {
            ChangeEvent::M2m { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_and_source() {
        let event = ChangeEvent::M2m {
            kind: RelationKind::UserRoles,
            phase: M2mPhase::PostAdd,
            owner_id: 4,
            targets: vec![1, 2],
        };
        assert_eq!(event.source(), Source::Relation(RelationKind::UserRoles));
        assert_eq!(event.subject_id(), Some(4));
        assert_eq!(event.m2m_phase(), Some(M2mPhase::PostAdd));

        let event = ChangeEvent::SystemConfigDeleted { key: "SITE_TITLE".into() };
        assert_eq!(event.subject_id(), None);
        assert_eq!(event.config_key(), Some("SITE_TITLE"));
        assert!(event.is_delete());
    }
}
