//! Model and field catalog
//!
//! Field permissions reference `ModelLabelField` rows. At startup every
//! permission-relevant entity is registered as a model node with one field
//! node per column. Failures are logged and never abort startup.

use sea_orm::{EntityTrait, IdenStatic, Iterable};

use crate::entity::model_label_field::{self, FieldType};
use crate::entity::{
    data_permission, dept_info, menu, system_config, user_info, user_personal_config, user_role,
};
use crate::error::AppResult;
use crate::store::SharedStore;

/// Label of the user model in field permissions
pub const USER_MODEL: &str = "system.userinfo";

fn columns<E: EntityTrait>() -> Vec<String> {
    E::Column::iter().map(|c| c.as_str().to_string()).collect()
}

/// Registered models with their column names
pub fn models() -> Vec<(&'static str, Vec<String>)> {
    vec![
        (USER_MODEL, columns::<user_info::Entity>()),
        ("system.userrole", columns::<user_role::Entity>()),
        ("system.deptinfo", columns::<dept_info::Entity>()),
        ("system.menu", columns::<menu::Entity>()),
        ("system.datapermission", columns::<data_permission::Entity>()),
        ("system.systemconfig", columns::<system_config::Entity>()),
        ("system.userpersonalconfig", columns::<user_personal_config::Entity>()),
    ]
}

/// Register every model and column missing from the catalog.
///
/// Returns the number of nodes created.
pub async fn sync_model_fields(store: &SharedStore) -> usize {
    let mut created = 0;
    for (label, fields) in models() {
        match sync_model(store, label, &fields).await {
            Ok(count) => created += count,
            Err(e) => tracing::error!("Failed to sync model fields of {}: {}", label, e),
        }
    }
    tracing::info!("Model field catalog synced, {} nodes created", created);
    created
}

async fn sync_model(store: &SharedStore, label: &str, fields: &[String]) -> AppResult<usize> {
    let mut created = 0;
    let (model_id, new) = ensure_node(store, FieldType::Model, label, 0).await?;
    created += usize::from(new);
    for field in fields {
        let (_, new) = ensure_node(store, FieldType::Field, field, model_id).await?;
        created += usize::from(new);
    }
    Ok(created)
}

async fn ensure_node(
    store: &SharedStore,
    field_type: FieldType,
    name: &str,
    parent_id: i64,
) -> AppResult<(i64, bool)> {
    if let Some(node) = store.model_field(field_type.into(), name, parent_id).await? {
        return Ok((node.id, false));
    }
    let node = store
        .save_model_field(model_label_field::Model {
            id: 0,
            field_type: field_type.into(),
            name: name.to_string(),
            label: name.to_string(),
            parent_id,
        })
        .await?;
    Ok((node.id, true))
}
