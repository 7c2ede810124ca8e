use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Schema,
    Statement,
};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::entity::{
    data_permission, dept_info, field_permission, menu, menu_meta, model_label_field, relation,
    system_config, user_info, user_personal_config, user_role,
};

/// Secondary indexes, as (name, table, columns)
const INDEXES: &[(&str, &str, &str)] = &[
    ("idx_sys_relation_owner", "sys_relation", "relation, owner_id"),
    ("idx_sys_relation_target", "sys_relation", "relation, target_id"),
    ("idx_sys_menu_parent", "sys_menu", "parent_id"),
    ("idx_sys_userinfo_dept", "sys_userinfo", "dept_id"),
];

/// Connect to the permission database and bring the schema up to date
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    info!("Connecting to database: {}:{}/{}", config.host, config.port, config.name);

    let mut opt = ConnectOptions::new(config.connection_url());
    opt.max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .set_schema_search_path("public");

    let db = Database::connect(opt).await?;
    info!("Database connection established");

    migrate(&db).await?;
    Ok(db)
}

/// Create missing `sys_*` tables and indexes; existing ones are left alone
async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let statements = migration_statements(backend);
    info!("Applying {} schema statements", statements.len());

    for sql in statements {
        db.execute(Statement::from_string(backend, sql)).await?;
    }

    info!("Schema is up to date");
    Ok(())
}

fn migration_statements(backend: DbBackend) -> Vec<String> {
    let schema = Schema::new(backend);
    // Tables reference each other by id only, order is not significant
    let tables: Vec<TableCreateStatement> = vec![
        schema.create_table_from_entity(dept_info::Entity),
        schema.create_table_from_entity(user_info::Entity),
        schema.create_table_from_entity(user_role::Entity),
        schema.create_table_from_entity(menu::Entity),
        schema.create_table_from_entity(menu_meta::Entity),
        schema.create_table_from_entity(data_permission::Entity),
        schema.create_table_from_entity(field_permission::Entity),
        schema.create_table_from_entity(model_label_field::Entity),
        schema.create_table_from_entity(system_config::Entity),
        schema.create_table_from_entity(user_personal_config::Entity),
        schema.create_table_from_entity(relation::Entity),
    ];

    let mut statements: Vec<String> = tables
        .into_iter()
        .map(|mut stmt| {
            stmt.if_not_exists();
            backend.build(&stmt).to_string()
        })
        .collect();
    statements.extend(INDEXES.iter().map(|(name, table, columns)| {
        format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", name, table, columns)
    }));
    statements
}
