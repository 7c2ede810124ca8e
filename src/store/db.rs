//! sea-orm backed store

use async_trait::async_trait;
use std::collections::BTreeSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbErr, EntityTrait, IntoActiveModel, NotSet, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};

use super::{
    PermissionStore, Side, DEPT_LINKS, FIELD_PERMISSION_LINKS, MENU_LINKS, ROLE_LINKS,
    RULE_LINKS, USER_LINKS,
};
use crate::entity::relation::{self, RelationKind};
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu_meta, model_label_field,
    system_config, user_info, user_personal_config, user_role,
};
use crate::error::{AppError, AppResult};

/// Store backed by the relational database
#[derive(Clone)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn id_value(id: i64) -> sea_orm::ActiveValue<i64> {
    if id == 0 {
        NotSet
    } else {
        Set(id)
    }
}

/// Insert a new row or update an existing one
async fn persist<'a, A, C>(conn: &'a C, active: A, is_new: bool) -> Result<<A::Entity as EntityTrait>::Model, DbErr>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send + 'a,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    if is_new {
        active.insert(conn).await
    } else {
        active.update(conn).await
    }
}

/// Delete relation rows referencing a removed record
async fn unlink<C: ConnectionTrait>(
    conn: &C,
    links: &[(RelationKind, Side)],
    id: i64,
) -> Result<(), DbErr> {
    for (kind, side) in links {
        let column = match side {
            Side::Owner => relation::Column::OwnerId,
            Side::Target => relation::Column::TargetId,
        };
        relation::Entity::delete_many()
            .filter(relation::Column::Relation.eq(kind.as_str()))
            .filter(column.eq(id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

async fn delete_field_permissions<C: ConnectionTrait>(
    conn: &C,
    column: field_permission::Column,
    id: i64,
) -> Result<(), DbErr> {
    let stale: Vec<i64> = field_permission::Entity::find()
        .select_only()
        .column(field_permission::Column::Id)
        .filter(column.eq(id))
        .into_tuple()
        .all(conn)
        .await?;
    for perm_id in &stale {
        unlink(conn, FIELD_PERMISSION_LINKS, *perm_id).await?;
    }
    if !stale.is_empty() {
        field_permission::Entity::delete_many()
            .filter(field_permission::Column::Id.is_in(stale))
            .exec(conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl PermissionStore for DbStore {
    async fn user(&self, id: i64) -> AppResult<Option<user_info::Model>> {
        Ok(user_info::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn user_by_username(&self, username: &str) -> AppResult<Option<user_info::Model>> {
        Ok(user_info::Entity::find()
            .filter(user_info::Column::Username.eq(username))
            .one(&self.db)
            .await?)
    }

    async fn users_in_depts(&self, dept_ids: &[i64]) -> AppResult<Vec<i64>> {
        if dept_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(user_info::Entity::find()
            .select_only()
            .column(user_info::Column::Id)
            .filter(user_info::Column::DeptId.is_in(dept_ids.to_vec()))
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn superusers(&self) -> AppResult<Vec<i64>> {
        Ok(user_info::Entity::find()
            .select_only()
            .column(user_info::Column::Id)
            .filter(user_info::Column::IsSuperuser.eq(true))
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn save_user(&self, user: user_info::Model) -> AppResult<user_info::Model> {
        let existing = user_info::Entity::find()
            .filter(user_info::Column::Username.eq(&user.username))
            .filter(user_info::Column::Id.ne(user.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Username {} already exists", user.username)));
        }
        let active = user_info::ActiveModel {
            id: id_value(user.id),
            username: Set(user.username),
            password: Set(user.password),
            nickname: Set(user.nickname),
            is_active: Set(user.is_active),
            is_superuser: Set(user.is_superuser),
            dept_id: Set(user.dept_id),
            mode_type: Set(user.mode_type),
            last_login: Set(user.last_login),
        };
        Ok(persist(&self.db, active, user.id == 0).await?)
    }

    async fn delete_user(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        unlink(&txn, USER_LINKS, id).await?;
        user_personal_config::Entity::delete_many()
            .filter(user_personal_config::Column::OwnerId.eq(id))
            .exec(&txn)
            .await?;
        user_info::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn roles(&self, ids: &[i64]) -> AppResult<Vec<user_role::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(user_role::Entity::find()
            .filter(user_role::Column::Id.is_in(ids.to_vec()))
            .order_by_asc(user_role::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn save_role(&self, role: user_role::Model) -> AppResult<user_role::Model> {
        let existing = user_role::Entity::find()
            .filter(user_role::Column::Code.eq(&role.code))
            .filter(user_role::Column::Id.ne(role.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Role code {} already exists", role.code)));
        }
        let active = user_role::ActiveModel {
            id: id_value(role.id),
            name: Set(role.name),
            code: Set(role.code),
            is_active: Set(role.is_active),
            description: Set(role.description),
        };
        Ok(persist(&self.db, active, role.id == 0).await?)
    }

    async fn delete_role(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        delete_field_permissions(&txn, field_permission::Column::RoleId, id).await?;
        unlink(&txn, ROLE_LINKS, id).await?;
        user_role::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn dept(&self, id: i64) -> AppResult<Option<dept_info::Model>> {
        Ok(dept_info::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn dept_children(&self, id: i64) -> AppResult<Vec<i64>> {
        Ok(dept_info::Entity::find()
            .select_only()
            .column(dept_info::Column::Id)
            .filter(dept_info::Column::ParentId.eq(id))
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn save_dept(&self, dept: dept_info::Model) -> AppResult<dept_info::Model> {
        let existing = dept_info::Entity::find()
            .filter(dept_info::Column::Code.eq(&dept.code))
            .filter(dept_info::Column::Id.ne(dept.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Department code {} already exists", dept.code)));
        }
        let active = dept_info::ActiveModel {
            id: id_value(dept.id),
            name: Set(dept.name),
            code: Set(dept.code),
            parent_id: Set(dept.parent_id),
            rank: Set(dept.rank),
            is_active: Set(dept.is_active),
            mode_type: Set(dept.mode_type),
        };
        Ok(persist(&self.db, active, dept.id == 0).await?)
    }

    async fn delete_dept(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        user_info::Entity::update_many()
            .col_expr(user_info::Column::DeptId, Expr::value(0i64))
            .filter(user_info::Column::DeptId.eq(id))
            .exec(&txn)
            .await?;
        unlink(&txn, DEPT_LINKS, id).await?;
        dept_info::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn menus(&self, ids: &[i64]) -> AppResult<Vec<menu::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(menu::Entity::find()
            .filter(menu::Column::Id.is_in(ids.to_vec()))
            .order_by_asc(menu::Column::Rank)
            .order_by_asc(menu::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn all_menus(&self) -> AppResult<Vec<menu::Model>> {
        Ok(menu::Entity::find()
            .order_by_asc(menu::Column::Rank)
            .order_by_asc(menu::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn menu_children(&self, id: i64) -> AppResult<Vec<i64>> {
        Ok(menu::Entity::find()
            .select_only()
            .column(menu::Column::Id)
            .filter(menu::Column::ParentId.eq(id))
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn menu_metas(&self, menu_ids: &[i64]) -> AppResult<Vec<menu_meta::Model>> {
        if menu_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(menu_meta::Entity::find()
            .filter(menu_meta::Column::MenuId.is_in(menu_ids.to_vec()))
            .all(&self.db)
            .await?)
    }

    async fn save_menu(&self, menu: menu::Model) -> AppResult<menu::Model> {
        let existing = menu::Entity::find()
            .filter(menu::Column::Name.eq(&menu.name))
            .filter(menu::Column::Id.ne(menu.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Menu {} already exists", menu.name)));
        }
        let active = menu::ActiveModel {
            id: id_value(menu.id),
            name: Set(menu.name),
            parent_id: Set(menu.parent_id),
            menu_type: Set(menu.menu_type),
            path: Set(menu.path),
            component: Set(menu.component),
            method: Set(menu.method),
            model: Set(menu.model),
            rank: Set(menu.rank),
            is_active: Set(menu.is_active),
        };
        Ok(persist(&self.db, active, menu.id == 0).await?)
    }

    async fn save_menu_meta(&self, meta: menu_meta::Model) -> AppResult<menu_meta::Model> {
        let existing = menu_meta::Entity::find()
            .filter(menu_meta::Column::MenuId.eq(meta.menu_id))
            .one(&self.db)
            .await?;
        let id = existing.as_ref().map(|m| m.id).unwrap_or(0);
        let active = menu_meta::ActiveModel {
            id: id_value(id),
            menu_id: Set(meta.menu_id),
            title: Set(meta.title),
            icon: Set(meta.icon),
            is_show_menu: Set(meta.is_show_menu),
            is_show_parent: Set(meta.is_show_parent),
            is_keepalive: Set(meta.is_keepalive),
            frame_url: Set(meta.frame_url),
        };
        Ok(persist(&self.db, active, existing.is_none()).await?)
    }

    async fn delete_menu(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        delete_field_permissions(&txn, field_permission::Column::MenuId, id).await?;
        menu_meta::Entity::delete_many()
            .filter(menu_meta::Column::MenuId.eq(id))
            .exec(&txn)
            .await?;
        unlink(&txn, MENU_LINKS, id).await?;
        menu::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn rules(&self, ids: &[i64]) -> AppResult<Vec<data_permission::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(data_permission::Entity::find()
            .filter(data_permission::Column::Id.is_in(ids.to_vec()))
            .order_by_asc(data_permission::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn save_rule(&self, rule: data_permission::Model) -> AppResult<data_permission::Model> {
        let existing = data_permission::Entity::find()
            .filter(data_permission::Column::Name.eq(&rule.name))
            .filter(data_permission::Column::Id.ne(rule.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Data permission {} already exists", rule.name)));
        }
        let active = data_permission::ActiveModel {
            id: id_value(rule.id),
            name: Set(rule.name),
            mode_type: Set(rule.mode_type),
            rules: Set(rule.rules),
            is_active: Set(rule.is_active),
            description: Set(rule.description),
        };
        Ok(persist(&self.db, active, rule.id == 0).await?)
    }

    async fn delete_rule(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        unlink(&txn, RULE_LINKS, id).await?;
        data_permission::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn field_permission(&self, id: i64) -> AppResult<Option<field_permission::Model>> {
        Ok(field_permission::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn field_permissions(
        &self,
        role_ids: &[i64],
        menu_id: i64,
    ) -> AppResult<Vec<field_permission::Model>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(field_permission::Entity::find()
            .filter(field_permission::Column::MenuId.eq(menu_id))
            .filter(field_permission::Column::RoleId.is_in(role_ids.to_vec()))
            .all(&self.db)
            .await?)
    }

    async fn save_field_permission(
        &self,
        perm: field_permission::Model,
    ) -> AppResult<field_permission::Model> {
        let existing = field_permission::Entity::find()
            .filter(field_permission::Column::RoleId.eq(perm.role_id))
            .filter(field_permission::Column::MenuId.eq(perm.menu_id))
            .filter(field_permission::Column::Id.ne(perm.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "Field permission for role {} and menu {} already exists",
                perm.role_id, perm.menu_id
            )));
        }
        let active = field_permission::ActiveModel {
            id: id_value(perm.id),
            role_id: Set(perm.role_id),
            menu_id: Set(perm.menu_id),
        };
        Ok(persist(&self.db, active, perm.id == 0).await?)
    }

    async fn delete_field_permission(&self, id: i64) -> AppResult<()> {
        let txn = self.db.begin().await?;
        unlink(&txn, FIELD_PERMISSION_LINKS, id).await?;
        field_permission::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn model_fields(&self, ids: &[i64]) -> AppResult<Vec<model_label_field::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(model_label_field::Entity::find()
            .filter(model_label_field::Column::Id.is_in(ids.to_vec()))
            .order_by_asc(model_label_field::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn model_field(
        &self,
        field_type: i32,
        name: &str,
        parent_id: i64,
    ) -> AppResult<Option<model_label_field::Model>> {
        Ok(model_label_field::Entity::find()
            .filter(model_label_field::Column::FieldType.eq(field_type))
            .filter(model_label_field::Column::Name.eq(name))
            .filter(model_label_field::Column::ParentId.eq(parent_id))
            .one(&self.db)
            .await?)
    }

    async fn save_model_field(
        &self,
        field: model_label_field::Model,
    ) -> AppResult<model_label_field::Model> {
        let active = model_label_field::ActiveModel {
            id: id_value(field.id),
            field_type: Set(field.field_type),
            name: Set(field.name),
            label: Set(field.label),
            parent_id: Set(field.parent_id),
        };
        Ok(persist(&self.db, active, field.id == 0).await?)
    }

    async fn related(&self, kind: RelationKind, owner_id: i64) -> AppResult<Vec<i64>> {
        Ok(relation::Entity::find()
            .select_only()
            .column(relation::Column::TargetId)
            .filter(relation::Column::Relation.eq(kind.as_str()))
            .filter(relation::Column::OwnerId.eq(owner_id))
            .order_by_asc(relation::Column::TargetId)
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn owners(&self, kind: RelationKind, target_ids: &[i64]) -> AppResult<Vec<i64>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(relation::Entity::find()
            .select_only()
            .column(relation::Column::OwnerId)
            .distinct()
            .filter(relation::Column::Relation.eq(kind.as_str()))
            .filter(relation::Column::TargetId.is_in(target_ids.to_vec()))
            .order_by_asc(relation::Column::OwnerId)
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    async fn add_related(&self, kind: RelationKind, owner_id: i64, target_ids: &[i64]) -> AppResult<()> {
        let present = self.related(kind, owner_id).await?;
        let missing: BTreeSet<i64> = target_ids
            .iter()
            .copied()
            .filter(|target| !present.contains(target))
            .collect();
        let rows: Vec<relation::ActiveModel> = missing
            .into_iter()
            .map(|target| relation::ActiveModel {
                id: NotSet,
                relation: Set(kind.as_str().to_string()),
                owner_id: Set(owner_id),
                target_id: Set(target),
            })
            .collect();
        if !rows.is_empty() {
            relation::Entity::insert_many(rows).exec(&self.db).await?;
        }
        Ok(())
    }

    async fn remove_related(
        &self,
        kind: RelationKind,
        owner_id: i64,
        target_ids: &[i64],
    ) -> AppResult<()> {
        if target_ids.is_empty() {
            return Ok(());
        }
        relation::Entity::delete_many()
            .filter(relation::Column::Relation.eq(kind.as_str()))
            .filter(relation::Column::OwnerId.eq(owner_id))
            .filter(relation::Column::TargetId.is_in(target_ids.to_vec()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn system_config(&self, key: &str) -> AppResult<Option<system_config::Model>> {
        Ok(system_config::Entity::find()
            .filter(system_config::Column::Key.eq(key))
            .one(&self.db)
            .await?)
    }

    async fn system_configs(&self) -> AppResult<Vec<system_config::Model>> {
        Ok(system_config::Entity::find()
            .order_by_asc(system_config::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn save_system_config(
        &self,
        config: system_config::Model,
    ) -> AppResult<system_config::Model> {
        let existing = system_config::Entity::find()
            .filter(system_config::Column::Key.eq(&config.key))
            .filter(system_config::Column::Id.ne(config.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Config {} already exists", config.key)));
        }
        let active = system_config::ActiveModel {
            id: id_value(config.id),
            key: Set(config.key),
            value: Set(config.value),
            is_active: Set(config.is_active),
            access: Set(config.access),
            inherit: Set(config.inherit),
            description: Set(config.description),
        };
        Ok(persist(&self.db, active, config.id == 0).await?)
    }

    async fn delete_system_config(&self, key: &str) -> AppResult<bool> {
        let result = system_config::Entity::delete_many()
            .filter(system_config::Column::Key.eq(key))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn user_config(
        &self,
        owner_id: i64,
        key: &str,
    ) -> AppResult<Option<user_personal_config::Model>> {
        Ok(user_personal_config::Entity::find()
            .filter(user_personal_config::Column::OwnerId.eq(owner_id))
            .filter(user_personal_config::Column::Key.eq(key))
            .one(&self.db)
            .await?)
    }

    async fn save_user_config(
        &self,
        config: user_personal_config::Model,
    ) -> AppResult<user_personal_config::Model> {
        let existing = user_personal_config::Entity::find()
            .filter(user_personal_config::Column::OwnerId.eq(config.owner_id))
            .filter(user_personal_config::Column::Key.eq(&config.key))
            .filter(user_personal_config::Column::Id.ne(config.id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("Config {} already exists", config.key)));
        }
        let active = user_personal_config::ActiveModel {
            id: id_value(config.id),
            owner_id: Set(config.owner_id),
            key: Set(config.key),
            value: Set(config.value),
            is_active: Set(config.is_active),
            access: Set(config.access),
            description: Set(config.description),
        };
        Ok(persist(&self.db, active, config.id == 0).await?)
    }

    async fn delete_user_config(&self, owner_id: i64, key: &str) -> AppResult<bool> {
        let result = user_personal_config::Entity::delete_many()
            .filter(user_personal_config::Column::OwnerId.eq(owner_id))
            .filter(user_personal_config::Column::Key.eq(key))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
