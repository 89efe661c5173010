//! Typed commands over any [`RouterApi`].

use crate::api::Row;
use crate::client::RouterApi;
use crate::error::ApiError;
use crate::records::{RemoteEntity, RouterIdentity};

fn borrowed<'a>(params: &'a [(&'static str, String)]) -> Vec<(&'a str, &'a str)> {
    params.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// Raw rows of the entity's menu, for callers that parse row by row.
pub async fn print_rows<E: RemoteEntity>(api: &mut dyn RouterApi) -> Result<Vec<Row>, ApiError> {
    let reply = api.call(&format!("{}/print", E::MENU), &[]).await?;
    Ok(reply.rows)
}

/// Lists every row of the entity's menu. One malformed row fails the whole list.
pub async fn fetch_all<E: RemoteEntity>(api: &mut dyn RouterApi) -> Result<Vec<E>, ApiError> {
    print_rows::<E>(api).await?.iter().map(E::from_row).collect()
}

/// Creates a row and returns the router-assigned `.id`.
pub async fn create<E: RemoteEntity>(api: &mut dyn RouterApi, record: &E) -> Result<String, ApiError> {
    let params: Vec<_> = record
        .params()
        .into_iter()
        .filter(|(key, value)| !(value.is_empty() && E::CLEARABLE.contains(key)))
        .collect();
    let reply = api
        .call(&format!("{}/add", E::MENU), &borrowed(&params))
        .await?;
    reply
        .ret()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Protocol(format!("{} add returned no id", E::KIND)))
}

/// Overwrites the writable attributes of the row identified by `remote_key`.
pub async fn update<E: RemoteEntity>(
    api: &mut dyn RouterApi,
    remote_key: &str,
    record: &E,
) -> Result<(), ApiError> {
    let mut params = vec![(".id", remote_key.to_string())];
    params.extend(record.params());
    api.call(&format!("{}/set", E::MENU), &borrowed(&params))
        .await?;
    Ok(())
}

/// Row count without transferring the rows.
pub async fn count<E: RemoteEntity>(api: &mut dyn RouterApi) -> Result<u64, ApiError> {
    let reply = api
        .call(&format!("{}/print", E::MENU), &[("count-only", "")])
        .await?;
    let ret = reply
        .ret()
        .ok_or_else(|| ApiError::Protocol(format!("{} count returned nothing", E::KIND)))?;
    ret.parse()
        .map_err(|_| ApiError::Protocol(format!("{} count '{ret}' is not a number", E::KIND)))
}

/// Lightweight identity check used by diagnostics and connection tests.
pub async fn identity(api: &mut dyn RouterApi) -> Result<RouterIdentity, ApiError> {
    let identity = api.call("/system/identity/print", &[]).await?;
    let resource = api.call("/system/resource/print", &[]).await?;
    RouterIdentity::from_rows(identity.rows.first(), resource.rows.first())
}
