use chrono::Utc;
use sea_orm::{
    prelude::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    DeleteResult, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::db::entities::connection_profile::{self, TransportMode};

/// Column values for a profile write. The credential arrives already
/// encrypted; `None` on update keeps the stored one.
#[derive(Clone)]
pub struct ConnectionProfileFields {
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub secret_ciphertext: Option<String>,
    pub transport: TransportMode,
    pub timeout_seconds: i32,
    pub description: Option<String>,
}

fn apply(active: &mut connection_profile::ActiveModel, fields: ConnectionProfileFields) {
    active.name = Set(fields.name);
    active.host = Set(fields.host);
    active.port = Set(fields.port);
    active.username = Set(fields.username);
    if let Some(ciphertext) = fields.secret_ciphertext {
        active.secret_ciphertext = Set(ciphertext);
    }
    active.transport = Set(fields.transport);
    active.timeout_seconds = Set(fields.timeout_seconds);
    active.description = Set(fields.description);
}

pub async fn list_connection_profiles<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<connection_profile::Model>, DbErr> {
    connection_profile::Entity::find()
        .order_by_asc(connection_profile::Column::Name)
        .all(db)
        .await
}

pub async fn get_connection_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<connection_profile::Model>, DbErr> {
    connection_profile::Entity::find_by_id(id).one(db).await
}

pub async fn get_active_connection_profile<C: ConnectionTrait>(
    db: &C,
) -> Result<Option<connection_profile::Model>, DbErr> {
    connection_profile::Entity::find()
        .filter(connection_profile::Column::IsActive.eq(true))
        .one(db)
        .await
}

pub async fn create_connection_profile<C: ConnectionTrait>(
    db: &C,
    fields: ConnectionProfileFields,
) -> Result<connection_profile::Model, DbErr> {
    let now = Utc::now();
    let mut active = connection_profile::ActiveModel {
        secret_ciphertext: Set(String::new()),
        is_active: Set(false),
        last_success_at: Set(None),
        last_failure_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    apply(&mut active, fields);
    active.insert(db).await
}

pub async fn update_connection_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
    fields: ConnectionProfileFields,
) -> Result<Option<connection_profile::Model>, DbErr> {
    let Some(model) = get_connection_profile(db, id).await? else {
        return Ok(None);
    };
    let mut active = model.into_active_model();
    apply(&mut active, fields);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map(Some)
}

/// Deletes `id` only while it is inactive, in one statement.
pub async fn delete_inactive_connection_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<DeleteResult, DbErr> {
    connection_profile::Entity::delete_many()
        .filter(connection_profile::Column::Id.eq(id))
        .filter(connection_profile::Column::IsActive.eq(false))
        .exec(db)
        .await
}

/// Makes `id` the only active profile. Returns `None` if it does not exist;
/// nothing is changed in that case.
pub async fn activate_connection_profile(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<connection_profile::Model>, DbErr> {
    let txn = db.begin().await?;

    let Some(target) = get_connection_profile(&txn, id).await? else {
        txn.rollback().await?;
        return Ok(None);
    };

    let now = Utc::now();
    connection_profile::Entity::update_many()
        .col_expr(connection_profile::Column::IsActive, Expr::value(false))
        .col_expr(connection_profile::Column::UpdatedAt, Expr::value(now))
        .filter(connection_profile::Column::IsActive.eq(true))
        .filter(connection_profile::Column::Id.ne(id))
        .exec(&txn)
        .await?;

    let mut active = target.into_active_model();
    active.is_active = Set(true);
    active.updated_at = Set(now);
    let activated = active.update(&txn).await?;

    txn.commit().await?;
    Ok(Some(activated))
}

pub async fn deactivate_connection_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<connection_profile::Model>, DbErr> {
    let Some(model) = get_connection_profile(db, id).await? else {
        return Ok(None);
    };
    let mut active = model.into_active_model();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map(Some)
}

/// Stamps `last_success_at` or `last_failure_at`. Returns rows touched.
pub async fn record_connection_outcome<C: ConnectionTrait>(
    db: &C,
    id: i32,
    success: bool,
) -> Result<u64, DbErr> {
    let column = if success {
        connection_profile::Column::LastSuccessAt
    } else {
        connection_profile::Column::LastFailureAt
    };
    let result = connection_profile::Entity::update_many()
        .col_expr(column, Expr::value(Some(Utc::now())))
        .filter(connection_profile::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
