use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ConnectionTrait, DbErr, EntityTrait, Set,
};

use crate::db::entities::setting;

pub const LAST_SYNC_AT: &str = "sync.last_sync_at";
pub const LAST_SYNC_SUMMARY: &str = "sync.last_summary";

/// Retrieves a setting by its key.
pub async fn get_setting<C: ConnectionTrait>(
    db: &C,
    key: &str,
) -> Result<Option<setting::Model>, DbErr> {
    setting::Entity::find_by_id(key.to_owned()).one(db).await
}

/// Creates or updates a setting.
pub async fn update_setting<C: ConnectionTrait>(
    db: &C,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), DbErr> {
    let active_setting = setting::ActiveModel {
        key: Set(key.to_owned()),
        value: Set(value.clone()),
        updated_at: Set(Utc::now()),
    };
    setting::Entity::insert(active_setting)
        .on_conflict(
            OnConflict::column(setting::Column::Key)
                .update_columns([setting::Column::Value, setting::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}
