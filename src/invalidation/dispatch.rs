//! Synchronous invalidation of derived cache entries

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::events::{ChangeEvent, Source};
use super::graph::{DerivedCache, Fanout, InvalidationGraph};
use crate::cache::{keys, MagicEngine};
use crate::entity::relation::RelationKind;
use crate::error::{AppError, AppResult};
use crate::store::SharedStore;
use crate::sysconfig::system::dependents;

/// Patterns deleted for one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub patterns: Vec<String>,
    pub deleted: usize,
}

impl InvalidationReport {
    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.iter().any(|p| p == pattern)
    }
}

/// Patterns resolved for one event, not yet deleted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    source: Option<Source>,
    patterns: Vec<String>,
}

/// Entries affected by one edge
#[derive(Debug)]
enum Target {
    Users(BTreeSet<i64>),
    Everyone,
    Patterns(Vec<String>),
}

impl Target {
    fn patterns(self, caches: &[DerivedCache]) -> Vec<String> {
        match self {
            Target::Users(ids) => ids
                .into_iter()
                .flat_map(|id| caches.iter().filter_map(move |cache| cache.user_pattern(id)))
                .collect(),
            Target::Everyone => caches.iter().map(|cache| cache.all_pattern()).collect(),
            Target::Patterns(patterns) => patterns,
        }
    }
}

/// Runs the invalidation graph against the store and cache
#[derive(Clone)]
pub struct Invalidator {
    graph: Arc<InvalidationGraph>,
    store: SharedStore,
    engine: MagicEngine,
}

impl Invalidator {
    /// `engine` must be the one the memoized readers use
    pub fn new(graph: InvalidationGraph, store: SharedStore, engine: MagicEngine) -> Self {
        Self {
            graph: Arc::new(graph),
            store,
            engine,
        }
    }

    /// Delete every cache entry derived from the record `event` is about
    pub async fn dispatch(&self, event: &ChangeEvent) -> InvalidationReport {
        let plan = self.plan(event).await;
        self.apply(plan).await
    }

    /// Resolve the entries `event` invalidates without deleting them.
    ///
    /// Used by deletes, which have to follow relations before the row goes
    /// away but must not delete until it is gone. When the affected users
    /// cannot be resolved the entries of every user are planned instead.
    pub async fn plan(&self, event: &ChangeEvent) -> InvalidationPlan {
        let mut patterns: Vec<String> = Vec::new();
        for edge in self.graph.edges_for(event) {
            let target = match self.resolve(edge.fanout, event).await {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(
                        "Failed to resolve {:?} for {:?}, invalidating all entries: {}",
                        edge.fanout,
                        event.source(),
                        e
                    );
                    Target::Everyone
                }
            };
            for pattern in target.patterns(edge.caches) {
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            }
        }

        InvalidationPlan {
            source: Some(event.source()),
            patterns,
        }
    }

    /// Delete the entries of a plan, retiring computations still running for them
    pub async fn apply(&self, plan: InvalidationPlan) -> InvalidationReport {
        let InvalidationPlan { source, patterns } = plan;
        let mut deleted = 0;
        for pattern in &patterns {
            match self.engine.invalidate(pattern).await {
                Ok(n) => deleted += n,
                Err(e) => tracing::warn!("Failed to invalidate {}: {}", pattern, e),
            }
        }
        if !patterns.is_empty() {
            tracing::debug!("Invalidated {:?}: {} entries via {:?}", source, deleted, patterns);
        }
        InvalidationReport { patterns, deleted }
    }

    async fn resolve(&self, fanout: Fanout, event: &ChangeEvent) -> AppResult<Target> {
        let target = match fanout {
            Fanout::Subject => Target::Users(BTreeSet::from([subject(event)?])),
            Fanout::UsersOfRole => {
                let role = [subject(event)?];
                let mut users: BTreeSet<i64> = self
                    .store
                    .owners(RelationKind::UserRoles, &role)
                    .await?
                    .into_iter()
                    .collect();
                let depts = self.store.owners(RelationKind::DeptRoles, &role).await?;
                users.extend(self.store.users_in_depts(&depts).await?);
                Target::Users(users)
            }
            Fanout::UsersOfRule => {
                let users = self
                    .store
                    .owners(RelationKind::UserRules, &[subject(event)?])
                    .await?;
                Target::Users(users.into_iter().collect())
            }
            Fanout::DeptUsersOfRule => {
                let depts = self
                    .store
                    .owners(RelationKind::DeptRules, &[subject(event)?])
                    .await?;
                Target::Users(self.store.users_in_depts(&depts).await?.into_iter().collect())
            }
            Fanout::UsersOfDept => {
                let users = self.store.users_in_depts(&[subject(event)?]).await?;
                Target::Users(users.into_iter().collect())
            }
            Fanout::DeptUsersOfMenu => {
                let roles = self
                    .store
                    .owners(RelationKind::RoleMenus, &[subject(event)?])
                    .await?;
                let depts = self.store.owners(RelationKind::DeptRoles, &roles).await?;
                Target::Users(self.store.users_in_depts(&depts).await?.into_iter().collect())
            }
            Fanout::Superusers => {
                Target::Users(self.store.superusers().await?.into_iter().collect())
            }
            Fanout::Everyone => Target::Everyone,
            Fanout::ConfigKey => Target::Patterns(vec![keys::system_config_key(config_key(event)?)]),
            Fanout::ConfigDependents => {
                let deps = dependents(&self.store, config_key(event)?).await?;
                Target::Patterns(deps.iter().map(|dep| keys::system_config_key(dep)).collect())
            }
            Fanout::InheritingUsers => {
                Target::Patterns(vec![keys::user_config_pattern(config_key(event)?)])
            }
            Fanout::UserConfigOwner => Target::Patterns(vec![keys::user_config_key(
                subject(event)?,
                config_key(event)?,
            )]),
            Fanout::MenuFields => match event {
                ChangeEvent::FieldPermissionSaved { menu_id, .. }
                | ChangeEvent::FieldPermissionDeleted { menu_id, .. } => Target::Patterns(vec![
                    keys::menu_data_pattern(keys::USER_FIELD_QUERYSET_FN, *menu_id),
                ]),
                _ => return Err(AppError::Internal("event names no menu".to_string())),
            },
            Fanout::FieldPermissionMenu => {
                match self.store.field_permission(subject(event)?).await? {
                    Some(perm) => Target::Patterns(vec![keys::menu_data_pattern(
                        keys::USER_FIELD_QUERYSET_FN,
                        perm.menu_id,
                    )]),
                    None => Target::Everyone,
                }
            }
        };
        Ok(target)
    }
}

fn subject(event: &ChangeEvent) -> AppResult<i64> {
    event
        .subject_id()
        .ok_or_else(|| AppError::Internal("event has no subject".to_string()))
}

fn config_key(event: &ChangeEvent) -> AppResult<&str> {
    event
        .config_key()
        .ok_or_else(|| AppError::Internal("event names no config key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::menu;
    use crate::invalidation::M2mPhase;
    use crate::store::PermissionStore;
    use crate::test_support::{new_config, new_dept, new_permission, new_role, new_rule, Fixture};
    use serde_json::json;

    #[tokio::test]
    async fn test_role_removal_empties_permission_map() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx.store.save_role(new_role("r1")).await.unwrap();
        let m1 = fx
            .store
            .save_menu(menu::Model {
                model: Some("demo.Book".into()),
                ..new_permission("book_create", "POST", "/api/book")
            })
            .await
            .unwrap();
        fx.link(RelationKind::UserRoles, user.id, role.id).await;
        fx.link(RelationKind::RoleMenus, role.id, m1.id).await;

        let map = fx.resolver.get_user_permission(&user, "POST").await.unwrap();
        let entry = map.get("/api/book").unwrap();
        assert_eq!((entry.menu_id, entry.model.as_deref()), (m1.id, Some("demo.Book")));

        let report = fx
            .invalidator
            .dispatch(&ChangeEvent::M2m {
                kind: RelationKind::UserRoles,
                phase: M2mPhase::PreRemove,
                owner_id: user.id,
                targets: vec![role.id],
            })
            .await;
        assert!(report.contains(&keys::user_data_pattern(keys::USER_PERMISSION_FN, user.id)));
        assert!(report.deleted >= 1);
        fx.store
            .remove_related(RelationKind::UserRoles, user.id, &[role.id])
            .await
            .unwrap();
        assert!(fx.resolver.get_user_permission(&user, "POST").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_phases_touch_nothing() {
        let fx = Fixture::new();
        for phase in [M2mPhase::PreAdd, M2mPhase::PostRemove] {
            let report = fx
                .invalidator
                .dispatch(&ChangeEvent::M2m {
                    kind: RelationKind::UserRoles,
                    phase,
                    owner_id: 1,
                    targets: vec![2],
                })
                .await;
            assert_eq!(report, InvalidationReport::default());
        }
    }

    #[tokio::test]
    async fn test_role_save_reaches_direct_and_department_users() {
        let fx = Fixture::new();
        let role = fx.store.save_role(new_role("ops")).await.unwrap();
        let direct = fx.user("alice").await;
        let dept = fx.store.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        let outsider = fx.user("carol").await;
        fx.link(RelationKind::UserRoles, direct.id, role.id).await;
        fx.link(RelationKind::DeptRoles, dept.id, role.id).await;

        let keys: Vec<String> = [direct.id, member.id, outsider.id]
            .iter()
            .map(|id| format!("magic_cache_data_get_user_permission_{}_GET", id))
            .collect();
        for key in &keys {
            fx.cache_set(key).await;
        }

        fx.invalidator.dispatch(&ChangeEvent::RoleSaved { id: role.id }).await;
        assert!(fx.cache_get(&keys[0]).await.is_none());
        assert!(fx.cache_get(&keys[1]).await.is_none());
        assert!(fx.cache_get(&keys[2]).await.is_some());
    }

    #[tokio::test]
    async fn test_rule_fans_out_to_holders_and_departments() {
        let fx = Fixture::new();
        let rule = fx.store.save_rule(new_rule("own", json!([]))).await.unwrap();
        let holder = fx.user("alice").await;
        let dept = fx.store.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        fx.link(RelationKind::UserRules, holder.id, rule.id).await;
        fx.link(RelationKind::DeptRules, dept.id, rule.id).await;

        let report = fx.invalidator.dispatch(&ChangeEvent::RuleDeleted { id: rule.id }).await;
        for id in [holder.id, member.id] {
            assert!(report.contains(&keys::user_data_pattern(keys::USER_DATA_RULES_FN, id)));
            assert!(report.contains(&keys::user_view_pattern(keys::USER_ROUTES_VIEW, id)));
        }
    }

    #[tokio::test]
    async fn test_menu_change_is_global() {
        let fx = Fixture::new();
        let menu = fx.store.save_menu(new_permission("m", "GET", "/api/m")).await.unwrap();
        let root = fx
            .store
            .save_user(crate::entity::user_info::Model {
                is_superuser: true,
                ..crate::test_support::new_user("root")
            })
            .await
            .unwrap();
        let planted = [
            format!("magic_cache_data_get_user_permission_{}_GET", 41),
            format!("magic_cache_response_UserMenuView_get_{}_-", 42),
            format!("magic_cache_response_UserRoutesView_get_{}_-", root.id),
        ];
        for key in &planted {
            fx.cache_set(key).await;
        }
        let report = fx.invalidator.dispatch(&ChangeEvent::MenuSaved { id: menu.id }).await;
        assert!(report.contains(&keys::all_data_pattern(keys::USER_PERMISSION_FN)));
        assert!(report.contains(&keys::user_view_pattern(keys::USER_ROUTES_VIEW, root.id)));
        for key in &planted {
            assert!(fx.cache_get(key).await.is_none(), "{} survived", key);
        }
    }

    #[tokio::test]
    async fn test_system_config_reaches_dependents_and_inheritors() {
        let fx = Fixture::new();
        fx.store.save_system_config(new_config("SITE_NAME", "\"xadmin\"")).await.unwrap();
        fx.store
            .save_system_config(new_config("LOGIN_TITLE", "\"{{ SITE_NAME }} login\""))
            .await
            .unwrap();
        let report = fx
            .invalidator
            .dispatch(&ChangeEvent::SystemConfigSaved { key: "SITE_NAME".into() })
            .await;
        assert_eq!(
            report.patterns,
            vec![
                keys::system_config_key("SITE_NAME"),
                keys::system_config_key("LOGIN_TITLE"),
                keys::user_config_pattern("SITE_NAME"),
            ]
        );
    }

    #[tokio::test]
    async fn test_field_permission_scopes_to_menu() {
        let fx = Fixture::new();
        let role = fx.store.save_role(new_role("editor")).await.unwrap();
        let perm = fx.field_permission(role.id, 7, "demo.book", &["title"]).await;
        let report = fx
            .invalidator
            .dispatch(&ChangeEvent::M2m {
                kind: RelationKind::FieldPermissionFields,
                phase: M2mPhase::PostAdd,
                owner_id: perm,
                targets: vec![1],
            })
            .await;
        assert_eq!(
            report.patterns,
            vec![keys::menu_data_pattern(keys::USER_FIELD_QUERYSET_FN, 7)]
        );
    }

    #[tokio::test]
    async fn test_department_links_reach_members() {
        let fx = Fixture::new();
        let dept = fx.store.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        let outsider = fx.user("carol").await;
        let role = fx.store.save_role(new_role("ops")).await.unwrap();
        let rule = fx.store.save_rule(new_rule("own", json!([]))).await.unwrap();

        for (kind, phase, target) in [
            (RelationKind::DeptRoles, M2mPhase::PostAdd, role.id),
            (RelationKind::DeptRoles, M2mPhase::PreRemove, role.id),
            (RelationKind::DeptRules, M2mPhase::PostAdd, rule.id),
            (RelationKind::DeptRules, M2mPhase::PreRemove, rule.id),
        ] {
            let member_key = format!("magic_cache_data_get_user_permission_{}_GET", member.id);
            let member_routes = format!("magic_cache_response_UserRoutesView_get_{}_-", member.id);
            let outsider_key = format!("magic_cache_data_get_user_permission_{}_GET", outsider.id);
            for key in [&member_key, &member_routes, &outsider_key] {
                fx.cache_set(key).await;
            }

            fx.invalidator
                .dispatch(&ChangeEvent::M2m {
                    kind,
                    phase,
                    owner_id: dept.id,
                    targets: vec![target],
                })
                .await;
            assert!(fx.cache_get(&member_key).await.is_none(), "{:?} {:?}", kind, phase);
            assert!(fx.cache_get(&member_routes).await.is_none(), "{:?} {:?}", kind, phase);
            assert!(fx.cache_get(&outsider_key).await.is_some(), "{:?} {:?}", kind, phase);
        }
    }

    #[tokio::test]
    async fn test_user_delete_clears_every_user_cache() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let other = fx.user("bob").await;
        let owned = [
            format!("magic_cache_data_get_user_permission_{}_GET", user.id),
            format!("magic_cache_data_get_user_field_queryset_{}_3", user.id),
            format!("magic_cache_data_get_user_data_rules_{}_3", user.id),
            format!("magic_cache_response_UserRoutesView_get_{}_-", user.id),
            format!("magic_cache_response_UserMenuView_get_{}_-", user.id),
        ];
        let kept = format!("magic_cache_data_get_user_permission_{}_GET", other.id);
        for key in owned.iter().chain([&kept]) {
            fx.cache_set(key).await;
        }

        let report = fx.invalidator.dispatch(&ChangeEvent::UserDeleted { id: user.id }).await;
        assert_eq!(report.deleted, owned.len());
        for key in &owned {
            assert!(fx.cache_get(key).await.is_none(), "{} survived", key);
        }
        assert!(fx.cache_get(&kept).await.is_some());
    }

    #[tokio::test]
    async fn test_plan_deletes_nothing_until_applied() {
        let fx = Fixture::new();
        let dept = fx.store.save_dept(new_dept("ops")).await.unwrap();
        let member = fx.user_in_dept("bob", dept.id).await;
        let key = format!("magic_cache_data_get_user_permission_{}_GET", member.id);
        fx.cache_set(&key).await;

        let plan = fx.invalidator.plan(&ChangeEvent::DeptDeleted { id: dept.id }).await;
        assert!(fx.cache_get(&key).await.is_some());

        // Members are resolved before the department goes away
        fx.store.delete_dept(dept.id).await.unwrap();
        let report = fx.invalidator.apply(plan).await;
        assert!(report.contains(&keys::user_data_pattern(keys::USER_PERMISSION_FN, member.id)));
        assert!(fx.cache_get(&key).await.is_none());
    }
}
