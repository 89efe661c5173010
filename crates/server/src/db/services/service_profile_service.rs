use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, DeleteResult, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;

use crate::db::entities::service_profile;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceProfileInput {
    pub name: String,
    pub rate_limit: Option<String>,
    pub local_address: Option<String>,
    pub remote_pool: Option<String>,
    pub comment: Option<String>,
}

impl ServiceProfileInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Service profile name must not be empty".to_string());
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn apply(active: &mut service_profile::ActiveModel, input: &ServiceProfileInput) {
    active.name = Set(input.name.clone());
    active.rate_limit = Set(non_empty(&input.rate_limit));
    active.local_address = Set(non_empty(&input.local_address));
    active.remote_pool = Set(non_empty(&input.remote_pool));
    active.comment = Set(non_empty(&input.comment));
}

pub async fn list_service_profiles<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<service_profile::Model>, DbErr> {
    service_profile::Entity::find()
        .order_by_asc(service_profile::Column::Name)
        .order_by_asc(service_profile::Column::Id)
        .all(db)
        .await
}

pub async fn get_service_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<service_profile::Model>, DbErr> {
    service_profile::Entity::find_by_id(id).one(db).await
}

pub async fn find_service_profile_by_remote_key<C: ConnectionTrait>(
    db: &C,
    remote_key: &str,
) -> Result<Option<service_profile::Model>, DbErr> {
    service_profile::Entity::find()
        .filter(service_profile::Column::RemoteKey.eq(remote_key))
        .one(db)
        .await
}

pub async fn find_pending_service_profile_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<service_profile::Model>, DbErr> {
    service_profile::Entity::find()
        .filter(service_profile::Column::Name.eq(name))
        .filter(service_profile::Column::RemoteKey.is_null())
        .order_by_asc(service_profile::Column::Id)
        .one(db)
        .await
}

pub async fn count_service_profiles<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    service_profile::Entity::find().count(db).await
}

pub async fn create_service_profile<C: ConnectionTrait>(
    db: &C,
    input: &ServiceProfileInput,
    remote_key: Option<String>,
) -> Result<service_profile::Model, DbErr> {
    let now = Utc::now();
    let mut active = service_profile::ActiveModel {
        remote_key: Set(remote_key),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    apply(&mut active, input);
    active.insert(db).await
}

pub async fn update_service_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
    input: &ServiceProfileInput,
    remote_key: Option<String>,
) -> Result<Option<service_profile::Model>, DbErr> {
    let Some(model) = get_service_profile(db, id).await? else {
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

pub async fn set_service_profile_remote_key<C: ConnectionTrait>(
    db: &C,
    id: i32,
    remote_key: &str,
) -> Result<(), DbErr> {
    let active = service_profile::ActiveModel {
        id: Set(id),
        remote_key: Set(Some(remote_key.to_owned())),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

pub async fn delete_service_profile<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<DeleteResult, DbErr> {
    service_profile::Entity::delete_by_id(id).exec(db).await
}
