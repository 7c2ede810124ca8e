//! Per-user permission data with memoization

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::{DataRule, FieldMap, PermissionMap, UserDataRules};
use crate::cache::{keys, CacheSpec, MagicCacheData};
use crate::entity::relation::RelationKind;
use crate::entity::{menu, user_info};
use crate::error::AppResult;
use crate::store::SharedStore;

pub const USER_PERMISSION: CacheSpec =
    CacheSpec::new(keys::USER_PERMISSION_FN, Duration::from_secs(60 * 60 * 24));
pub const USER_FIELD_QUERYSET: CacheSpec =
    CacheSpec::new(keys::USER_FIELD_QUERYSET_FN, Duration::from_secs(10));
pub const USER_DATA_RULES: CacheSpec =
    CacheSpec::new(keys::USER_DATA_RULES_FN, Duration::from_secs(60 * 60));

#[derive(Clone)]
pub struct PermissionResolver {
    store: SharedStore,
    magic: MagicCacheData,
}

impl PermissionResolver {
    pub fn new(store: SharedStore, magic: MagicCacheData) -> Self {
        Self { store, magic }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Active roles of the user and of their active department.
    ///
    /// `None` when the user holds no role and has no active department
    /// holding one.
    pub async fn active_role_ids(&self, user: &user_info::Model) -> AppResult<Option<Vec<i64>>> {
        let mut candidates = self.store.related(RelationKind::UserRoles, user.id).await?;
        let mut has_role = !candidates.is_empty();

        if user.has_dept() {
            if let Some(dept) = self.store.dept(user.dept_id).await? {
                if dept.is_active {
                    let dept_roles = self.store.related(RelationKind::DeptRoles, dept.id).await?;
                    has_role |= !dept_roles.is_empty();
                    candidates.extend(dept_roles);
                }
            }
        }
        if !has_role {
            return Ok(None);
        }

        let roles = self.store.roles(&candidates).await?;
        Ok(Some(roles.into_iter().filter(|r| r.is_active).map(|r| r.id).collect()))
    }

    /// Active menus granted to the user through their roles
    pub async fn get_user_menu_queryset(
        &self,
        user: &user_info::Model,
    ) -> AppResult<Option<Vec<menu::Model>>> {
        let Some(role_ids) = self.active_role_ids(user).await? else {
            return Ok(None);
        };
        let mut menu_ids = BTreeSet::new();
        for role_id in &role_ids {
            menu_ids.extend(self.store.related(RelationKind::RoleMenus, *role_id).await?);
        }
        let menu_ids: Vec<i64> = menu_ids.into_iter().collect();
        let menus = self.store.menus(&menu_ids).await?;
        Ok(Some(menus.into_iter().filter(|m| m.is_active).collect()))
    }

    /// Permission paths the user may call with `method`
    pub async fn get_user_permission(
        &self,
        user: &user_info::Model,
        method: &str,
    ) -> AppResult<PermissionMap> {
        let part = keys::user_permission_part(user.id, method);
        self.magic
            .cached(&USER_PERMISSION, Some(&part), || async {
                let mut map = PermissionMap::new();
                if let Some(menus) = self.get_user_menu_queryset(user).await? {
                    for m in menus
                        .into_iter()
                        .filter(|m| m.is_permission() && m.method.eq_ignore_ascii_case(method))
                    {
                        map.insert(m.path, m.id, m.model);
                    }
                }
                Ok(map)
            })
            .await
    }

    /// Fields the user may see under `menu_id`, grouped by model
    pub async fn get_user_field_queryset(
        &self,
        user: &user_info::Model,
        menu_id: i64,
    ) -> AppResult<FieldMap> {
        let part = keys::user_menu_part(user.id, menu_id);
        self.magic
            .cached(&USER_FIELD_QUERYSET, Some(&part), || async {
                let Some(role_ids) = self.active_role_ids(user).await? else {
                    return Ok(FieldMap::new());
                };
                let mut field_ids = BTreeSet::new();
                for perm in self.store.field_permissions(&role_ids, menu_id).await? {
                    field_ids.extend(
                        self.store
                            .related(RelationKind::FieldPermissionFields, perm.id)
                            .await?,
                    );
                }
                let field_ids: Vec<i64> = field_ids.into_iter().collect();
                let fields = self.store.model_fields(&field_ids).await?;

                let parent_ids: Vec<i64> = fields
                    .iter()
                    .map(|f| f.parent_id)
                    .filter(|id| *id != 0)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let parents: BTreeMap<i64, String> = self
                    .store
                    .model_fields(&parent_ids)
                    .await?
                    .into_iter()
                    .map(|p| (p.id, p.name))
                    .collect();

                let mut result = FieldMap::new();
                for field in fields {
                    if let Some(model) = parents.get(&field.parent_id) {
                        result.entry(model.clone()).or_default().insert(field.name);
                    }
                }
                Ok(result)
            })
            .await
    }

    /// Data permission rule-sets in force for the user under `menu_id`.
    ///
    /// The user's own active rules apply with the user's mode; without any,
    /// the rules of their active department apply with the department's mode.
    /// Rules bound to menus only apply under those menus.
    pub async fn get_user_data_rules(
        &self,
        user: &user_info::Model,
        menu_id: i64,
    ) -> AppResult<UserDataRules> {
        let part = keys::user_menu_part(user.id, menu_id);
        self.magic
            .cached(&USER_DATA_RULES, Some(&part), || async {
                let own = self.rules_for(RelationKind::UserRules, user.id, menu_id).await?;
                if !own.is_empty() {
                    return Ok(UserDataRules {
                        mode: user.mode(),
                        rules: own,
                    });
                }
                if user.has_dept() {
                    if let Some(dept) = self.store.dept(user.dept_id).await? {
                        if dept.is_active {
                            let rules =
                                self.rules_for(RelationKind::DeptRules, dept.id, menu_id).await?;
                            return Ok(UserDataRules {
                                mode: dept.mode(),
                                rules,
                            });
                        }
                    }
                }
                Ok(UserDataRules {
                    mode: user.mode(),
                    rules: Vec::new(),
                })
            })
            .await
    }

    async fn rules_for(
        &self,
        kind: RelationKind,
        owner_id: i64,
        menu_id: i64,
    ) -> AppResult<Vec<DataRule>> {
        let rule_ids = self.store.related(kind, owner_id).await?;
        let mut result = Vec::new();
        for rule in self.store.rules(&rule_ids).await? {
            if !rule.is_active {
                continue;
            }
            let menus = self.store.related(RelationKind::RuleMenus, rule.id).await?;
            if !menus.is_empty() && !menus.contains(&menu_id) {
                continue;
            }
            result.push(DataRule {
                id: rule.id,
                name: rule.name.clone(),
                mode: rule.mode(),
                rules: rule.rules,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{dept_info, menu::MenuType, user_role, ModeType};
    use crate::store::PermissionStore;
    use crate::test_support::{Fixture, new_dept, new_permission, new_role, new_rule};
    use serde_json::json;

    #[tokio::test]
    async fn test_user_without_roles_has_no_menus() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        assert!(fx.resolver.get_user_menu_queryset(&user).await.unwrap().is_none());
        for method in ["GET", "POST", "PUT", "DELETE"] {
            assert!(fx.resolver.get_user_permission(&user, method).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_permission_map_for_method() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx.store.save_role(new_role("editor")).await.unwrap();
        let create = fx
            .store
            .save_menu(menu::Model {
                model: Some("demo.book".into()),
                ..new_permission("book_create", "POST", "/api/book")
            })
            .await
            .unwrap();
        let list = fx.store.save_menu(new_permission("book_list", "GET", "/api/book")).await.unwrap();
        fx.link(RelationKind::UserRoles, user.id, role.id).await;
        fx.link(RelationKind::RoleMenus, role.id, create.id).await;
        fx.link(RelationKind::RoleMenus, role.id, list.id).await;

        let post = fx.resolver.get_user_permission(&user, "post").await.unwrap();
        assert_eq!(post.len(), 1);
        let entry = post.get("/api/book").unwrap();
        assert_eq!(entry.menu_id, create.id);
        assert_eq!(entry.model.as_deref(), Some("demo.book"));

        let key = format!("magic_cache_data_get_user_permission_{}_POST", user.id);
        assert!(fx.cache_get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_inactive_role_and_menu_are_skipped() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx
            .store
            .save_role(user_role::Model { is_active: false, ..new_role("off") })
            .await
            .unwrap();
        let menu = fx.store.save_menu(new_permission("m", "GET", "/api/m")).await.unwrap();
        fx.link(RelationKind::UserRoles, user.id, role.id).await;
        fx.link(RelationKind::RoleMenus, role.id, menu.id).await;
        assert_eq!(fx.resolver.get_user_menu_queryset(&user).await.unwrap(), Some(vec![]));

        let active = fx.store.save_role(new_role("on")).await.unwrap();
        let hidden = fx
            .store
            .save_menu(menu::Model { is_active: false, ..new_permission("h", "GET", "/api/h") })
            .await
            .unwrap();
        fx.link(RelationKind::UserRoles, user.id, active.id).await;
        fx.link(RelationKind::RoleMenus, active.id, hidden.id).await;
        fx.link(RelationKind::RoleMenus, active.id, menu.id).await;
        let menus = fx.resolver.get_user_menu_queryset(&user).await.unwrap().unwrap();
        assert_eq!(menus.iter().map(|m| m.id).collect::<Vec<_>>(), vec![menu.id]);
    }

    #[tokio::test]
    async fn test_department_roles_apply_when_dept_active() {
        let fx = Fixture::new();
        let dept = fx.store.save_dept(new_dept("ops")).await.unwrap();
        let user = fx.user_in_dept("bob", dept.id).await;
        let role = fx.store.save_role(new_role("ops")).await.unwrap();
        let menu = fx
            .store
            .save_menu(menu::Model { menu_type: MenuType::Menu.into(), ..new_permission("dash", "", "/dash") })
            .await
            .unwrap();
        fx.link(RelationKind::DeptRoles, dept.id, role.id).await;
        fx.link(RelationKind::RoleMenus, role.id, menu.id).await;
        let menus = fx.resolver.get_user_menu_queryset(&user).await.unwrap().unwrap();
        assert_eq!(menus.len(), 1);

        fx.store
            .save_dept(dept_info::Model { is_active: false, ..dept })
            .await
            .unwrap();
        assert!(fx.resolver.get_user_menu_queryset(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_field_queryset_groups_by_model() {
        let fx = Fixture::new();
        let user = fx.user("alice").await;
        let role = fx.store.save_role(new_role("editor")).await.unwrap();
        let menu = fx.store.save_menu(new_permission("book_list", "GET", "/api/book")).await.unwrap();
        fx.link(RelationKind::UserRoles, user.id, role.id).await;
        let perm = fx.field_permission(role.id, menu.id, "demo.book", &["id", "title"]).await;
        assert!(perm > 0);

        let fields = fx.resolver.get_user_field_queryset(&user, menu.id).await.unwrap();
        let book: Vec<&str> = fields["demo.book"].iter().map(String::as_str).collect();
        assert_eq!(book, vec!["id", "title"]);
    }

    #[tokio::test]
    async fn test_data_rules_prefer_user_rules() {
        let fx = Fixture::new();
        let dept = fx.store.save_dept(dept_info::Model { mode_type: 1, ..new_dept("ops") }).await.unwrap();
        let user = fx.user_in_dept("bob", dept.id).await;
        let dept_rule = fx.store.save_rule(new_rule("dept", json!([{"field": "dept"}]))).await.unwrap();
        fx.link(RelationKind::DeptRules, dept.id, dept_rule.id).await;

        let rules = fx.resolver.get_user_data_rules(&user, 9).await.unwrap();
        assert_eq!(rules.mode, ModeType::And);
        assert_eq!(rules.rules.len(), 1);

        let scoped = fx.store.save_rule(new_rule("own", json!([{"field": "owner"}]))).await.unwrap();
        fx.link(RelationKind::UserRules, user.id, scoped.id).await;
        fx.link(RelationKind::RuleMenus, scoped.id, 5).await;
        fx.magic.invalid_cache("*").await;

        let other_menu = fx.resolver.get_user_data_rules(&user, 9).await.unwrap();
        assert_eq!(other_menu.rules[0].name, "dept");
        let scoped_menu = fx.resolver.get_user_data_rules(&user, 5).await.unwrap();
        assert_eq!(scoped_menu.mode, ModeType::Or);
        assert_eq!(scoped_menu.rules[0].name, "own");
    }
}
