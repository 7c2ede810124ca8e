//! Dependency edges from mutated records to derived cache entries

use crate::cache::keys;
use crate::entity::relation::RelationKind;

use super::events::{ChangeEvent, M2mPhase, Source};

/// A family of derived cache entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedCache {
    UserRoutes,
    UserMenus,
    UserPermission,
    UserFieldQueryset,
    UserDataRules,
    SystemConfig,
    UserConfig,
}

impl DerivedCache {
    /// Entries of one user, when the cache is keyed by user
    pub fn user_pattern(self, user_id: i64) -> Option<String> {
        match self {
            DerivedCache::UserRoutes => Some(keys::user_view_pattern(keys::USER_ROUTES_VIEW, user_id)),
            DerivedCache::UserMenus => Some(keys::user_view_pattern(keys::USER_MENU_VIEW, user_id)),
            DerivedCache::UserPermission => Some(keys::user_data_pattern(keys::USER_PERMISSION_FN, user_id)),
            DerivedCache::UserFieldQueryset => {
                Some(keys::user_data_pattern(keys::USER_FIELD_QUERYSET_FN, user_id))
            }
            DerivedCache::UserDataRules => Some(keys::user_data_pattern(keys::USER_DATA_RULES_FN, user_id)),
            DerivedCache::SystemConfig | DerivedCache::UserConfig => None,
        }
    }

    /// Every entry of the cache
    pub fn all_pattern(self) -> String {
        match self {
            DerivedCache::UserRoutes => keys::all_view_pattern(keys::USER_ROUTES_VIEW),
            DerivedCache::UserMenus => keys::all_view_pattern(keys::USER_MENU_VIEW),
            DerivedCache::UserPermission => keys::all_data_pattern(keys::USER_PERMISSION_FN),
            DerivedCache::UserFieldQueryset => keys::all_data_pattern(keys::USER_FIELD_QUERYSET_FN),
            DerivedCache::UserDataRules => keys::all_data_pattern(keys::USER_DATA_RULES_FN),
            DerivedCache::SystemConfig => keys::system_config_key("*"),
            DerivedCache::UserConfig => keys::user_config_pattern("*"),
        }
    }
}

/// Every per-user derived cache
pub const USER_CACHES: &[DerivedCache] = &[
    DerivedCache::UserRoutes,
    DerivedCache::UserMenus,
    DerivedCache::UserPermission,
    DerivedCache::UserFieldQueryset,
    DerivedCache::UserDataRules,
];

const NAVIGATION_CACHES: &[DerivedCache] = &[
    DerivedCache::UserMenus,
    DerivedCache::UserRoutes,
    DerivedCache::UserPermission,
];

const DEPT_MENU_CACHES: &[DerivedCache] = &[
    DerivedCache::UserRoutes,
    DerivedCache::UserMenus,
    DerivedCache::UserPermission,
    DerivedCache::UserFieldQueryset,
];

const ROUTE_CACHES: &[DerivedCache] = &[DerivedCache::UserRoutes, DerivedCache::UserMenus];

/// How the affected entries are found from the event's subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fanout {
    /// The user the event is about
    Subject,
    /// Holders of a role, directly or through their department
    UsersOfRole,
    /// Users holding a data permission directly
    UsersOfRule,
    /// Users of departments holding a data permission
    DeptUsersOfRule,
    /// Members of a department
    UsersOfDept,
    /// Members of departments whose roles grant a menu
    DeptUsersOfMenu,
    Superusers,
    /// Every user, by wildcard pattern
    Everyone,
    /// The changed system config
    ConfigKey,
    /// System configs rendered from the changed one
    ConfigDependents,
    /// User values of the changed key, inherited or not
    InheritingUsers,
    /// The changed user config
    UserConfigOwner,
    /// Field querysets of the menu named by the event
    MenuFields,
    /// Field querysets of the menu a field permission belongs to
    FieldPermissionMenu,
}

/// `source` changes matching `when` invalidate `caches` of the `fanout` set
#[derive(Clone)]
pub struct Edge {
    pub source: Source,
    pub when: fn(&ChangeEvent) -> bool,
    pub fanout: Fanout,
    pub caches: &'static [DerivedCache],
}

fn always(_: &ChangeEvent) -> bool {
    true
}

/// Associations invalidate once the addition is visible and before the removal
fn post_add_or_pre_remove(event: &ChangeEvent) -> bool {
    matches!(event.m2m_phase(), Some(M2mPhase::PostAdd | M2mPhase::PreRemove))
}

fn user_permission_fields_changed(event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::UserSaved { changed, .. } => changed.iter().any(|f| f.affects_permission()),
        _ => false,
    }
}

fn user_status_changed(event: &ChangeEvent) -> bool {
    use crate::entity::user_info::UserField;
    match event {
        ChangeEvent::UserSaved { changed, .. } => changed
            .iter()
            .any(|f| matches!(f, UserField::IsActive | UserField::IsSuperuser)),
        _ => false,
    }
}

fn is_delete(event: &ChangeEvent) -> bool {
    event.is_delete()
}

fn edge(
    source: Source,
    when: fn(&ChangeEvent) -> bool,
    fanout: Fanout,
    caches: &'static [DerivedCache],
) -> Edge {
    Edge {
        source,
        when,
        fanout,
        caches,
    }
}

fn m2m(kind: RelationKind, fanout: Fanout, caches: &'static [DerivedCache]) -> Edge {
    edge(Source::Relation(kind), post_add_or_pre_remove, fanout, caches)
}

pub struct InvalidationGraph {
    edges: Vec<Edge>,
}

impl InvalidationGraph {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    /// The dependency graph of permission and config caches
    pub fn standard() -> Self {
        Self::new(vec![
            // 用户
            edge(Source::User, user_permission_fields_changed, Fanout::Subject, USER_CACHES),
            edge(Source::User, user_status_changed, Fanout::Subject, ROUTE_CACHES),
            edge(Source::User, is_delete, Fanout::Subject, USER_CACHES),
            // 角色
            edge(Source::Role, always, Fanout::UsersOfRole, USER_CACHES),
            // 数据权限
            edge(Source::DataPermission, always, Fanout::UsersOfRule, USER_CACHES),
            edge(Source::DataPermission, always, Fanout::DeptUsersOfRule, USER_CACHES),
            // 部门
            edge(Source::Dept, always, Fanout::UsersOfDept, USER_CACHES),
            // 菜单
            edge(Source::Menu, always, Fanout::Everyone, NAVIGATION_CACHES),
            edge(Source::Menu, always, Fanout::DeptUsersOfMenu, DEPT_MENU_CACHES),
            edge(Source::Menu, always, Fanout::Superusers, ROUTE_CACHES),
            // 字段权限
            edge(
                Source::FieldPermission,
                always,
                Fanout::MenuFields,
                &[DerivedCache::UserFieldQueryset],
            ),
            // 配置
            edge(Source::SystemConfig, always, Fanout::ConfigKey, &[DerivedCache::SystemConfig]),
            edge(
                Source::SystemConfig,
                always,
                Fanout::ConfigDependents,
                &[DerivedCache::SystemConfig],
            ),
            edge(
                Source::SystemConfig,
                always,
                Fanout::InheritingUsers,
                &[DerivedCache::UserConfig],
            ),
            edge(Source::UserConfig, always, Fanout::UserConfigOwner, &[DerivedCache::UserConfig]),
            // 多对多
            m2m(RelationKind::UserRoles, Fanout::Subject, USER_CACHES),
            m2m(RelationKind::UserRules, Fanout::Subject, USER_CACHES),
            m2m(RelationKind::DeptRoles, Fanout::UsersOfDept, USER_CACHES),
            m2m(RelationKind::DeptRules, Fanout::UsersOfDept, USER_CACHES),
            m2m(RelationKind::RoleMenus, Fanout::UsersOfRole, USER_CACHES),
            m2m(RelationKind::RuleMenus, Fanout::UsersOfRule, &[DerivedCache::UserDataRules]),
            m2m(RelationKind::RuleMenus, Fanout::DeptUsersOfRule, &[DerivedCache::UserDataRules]),
            m2m(
                RelationKind::FieldPermissionFields,
                Fanout::FieldPermissionMenu,
                &[DerivedCache::UserFieldQueryset],
            ),
        ])
    }

    /// Edges triggered by `event`, in registration order
    pub fn edges_for<'a>(&'a self, event: &'a ChangeEvent) -> impl Iterator<Item = &'a Edge> + 'a {
        let source = event.source();
        self.edges
            .iter()
            .filter(move |edge| edge.source == source && (edge.when)(event))
    }
}
