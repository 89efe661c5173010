pub mod entities;
pub mod services;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

use entities::prelude::{ConnectionProfile, ServiceProfile, Setting, SubscriberSecret};

/// At most one profile row may carry `is_active = true`.
const SINGLE_ACTIVE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
     idx_connection_profiles_single_active ON connection_profiles (is_active) WHERE is_active";

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(10)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;
    migrate(&db).await?;
    Ok(db)
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Creates missing tables and indexes. Safe to run on every start.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, ConnectionProfile).await?;
    create_table(db, SubscriberSecret).await?;
    create_table(db, ServiceProfile).await?;
    create_table(db, Setting).await?;
    db.execute_unprepared(SINGLE_ACTIVE_INDEX).await?;
    info!(backend = ?db.get_database_backend(), "Database schema is up to date.");
    Ok(())
}
