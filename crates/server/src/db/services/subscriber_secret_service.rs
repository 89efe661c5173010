use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, DeleteResult, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;

use crate::db::entities::subscriber_secret;

/// Editable fields of a subscriber secret, as submitted by an operator or
/// materialized from a router row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecretInput {
    pub name: String,
    pub password: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    pub remote_address: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub comment: Option<String>,
}

fn default_service() -> String {
    "any".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

impl SecretInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Secret name must not be empty".to_string());
        }
        if self.password.is_empty() {
            return Err("Secret password must not be empty".to_string());
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn apply(active: &mut subscriber_secret::ActiveModel, input: &SecretInput) {
    active.name = Set(input.name.clone());
    active.password = Set(input.password.clone());
    active.service = Set(input.service.clone());
    active.profile = Set(input.profile.clone());
    active.remote_address = Set(non_empty(&input.remote_address));
    active.disabled = Set(input.disabled);
    active.comment = Set(non_empty(&input.comment));
}

pub async fn list_secrets<C: ConnectionTrait>(db: &C) -> Result<Vec<subscriber_secret::Model>, DbErr> {
    subscriber_secret::Entity::find()
        .order_by_asc(subscriber_secret::Column::Name)
        .order_by_asc(subscriber_secret::Column::Id)
        .all(db)
        .await
}

pub async fn get_secret<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<subscriber_secret::Model>, DbErr> {
    subscriber_secret::Entity::find_by_id(id).one(db).await
}

pub async fn find_secret_by_remote_key<C: ConnectionTrait>(
    db: &C,
    remote_key: &str,
) -> Result<Option<subscriber_secret::Model>, DbErr> {
    subscriber_secret::Entity::find()
        .filter(subscriber_secret::Column::RemoteKey.eq(remote_key))
        .one(db)
        .await
}

/// A local secret with this name that has never been pushed.
pub async fn find_pending_secret_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<subscriber_secret::Model>, DbErr> {
    subscriber_secret::Entity::find()
        .filter(subscriber_secret::Column::Name.eq(name))
        .filter(subscriber_secret::Column::RemoteKey.is_null())
        .order_by_asc(subscriber_secret::Column::Id)
        .one(db)
        .await
}

pub async fn count_secrets<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    subscriber_secret::Entity::find().count(db).await
}

pub async fn create_secret<C: ConnectionTrait>(
    db: &C,
    input: &SecretInput,
    remote_key: Option<String>,
) -> Result<subscriber_secret::Model, DbErr> {
    let now = Utc::now();
    let mut active = subscriber_secret::ActiveModel {
        remote_key: Set(remote_key),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    apply(&mut active, input);
    active.insert(db).await
}

/// Overwrites the editable fields. `remote_key` is left alone unless given.
pub async fn update_secret<C: ConnectionTrait>(
    db: &C,
    id: i32,
    input: &SecretInput,
    remote_key: Option<String>,
) -> Result<Option<subscriber_secret::Model>, DbErr> {
    let Some(model) = get_secret(db, id).await? else {
        return Ok(None);
    };
    let mut active = model.into_active_model();
    apply(&mut active, input);
    if let Some(key) = remote_key {
        active.remote_key = Set(Some(key));
    }
    active.updated_at = Set(Utc::now());
    active.update(db).await.map(Some)
}

pub async fn set_secret_remote_key<C: ConnectionTrait>(
    db: &C,
    id: i32,
    remote_key: &str,
) -> Result<(), DbErr> {
    let active = subscriber_secret::ActiveModel {
        id: Set(id),
        remote_key: Set(Some(remote_key.to_owned())),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

pub async fn delete_secret<C: ConnectionTrait>(db: &C, id: i32) -> Result<DeleteResult, DbErr> {
    subscriber_secret::Entity::delete_by_id(id).exec(db).await
}
