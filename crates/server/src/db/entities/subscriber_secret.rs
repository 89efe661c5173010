use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Local mirror of a router PPP secret. `remote_key` is the router's `.id`;
/// `None` means the record is pending push.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriber_secrets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub password: String,
    pub service: String,
    pub profile: String,
    pub remote_address: Option<String>,
    pub disabled: bool,
    pub comment: Option<String>,
    #[sea_orm(unique)]
    pub remote_key: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
