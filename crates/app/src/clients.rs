use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use soderia_core::ledger::PurchaseDraft;
use soderia_core::types::{Client, ClientBalance, LineItems, Purchase, Returns};
use soderia_core::validate;
use soderia_storage::{ClientUpdate, NewClient};

use crate::auth::{AdminUser, AuthUser};
use crate::error::{ApiError, ApiJson, ApiPath};
use crate::ledger::LedgerReceipt;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateClient {
    name: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    debt: i64,
    #[serde(default)]
    siphons_held: i64,
    #[serde(default)]
    jugs_held: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClient {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    debt: Option<i64>,
    #[serde(default)]
    siphons_held: Option<i64>,
    #[serde(default)]
    jugs_held: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    name: Option<String>,
}

/// New purchase; omitted quantities count as zero.
#[derive(Debug, Deserialize)]
pub struct CreatePurchase {
    #[serde(default)]
    siphons: i64,
    #[serde(default)]
    jugs_6l: i64,
    #[serde(default)]
    jugs_12l: i64,
    #[serde(default)]
    paid: i64,
    #[serde(default)]
    returned_siphons: i64,
    #[serde(default)]
    returned_jugs: i64,
}

/// Replacement values for a stored purchase; every field is required.
#[derive(Debug, Deserialize)]
pub struct ModifyPurchase {
    siphons: i64,
    jugs_6l: i64,
    jugs_12l: i64,
    paid: i64,
    returned_siphons: i64,
    returned_jugs: i64,
}

impl CreatePurchase {
    fn into_draft(self) -> Result<PurchaseDraft, ApiError> {
        ModifyPurchase {
            siphons: self.siphons,
            jugs_6l: self.jugs_6l,
            jugs_12l: self.jugs_12l,
            paid: self.paid,
            returned_siphons: self.returned_siphons,
            returned_jugs: self.returned_jugs,
        }
        .into_draft()
    }
}

impl ModifyPurchase {
    fn into_draft(self) -> Result<PurchaseDraft, ApiError> {
        let draft = PurchaseDraft::new(
            LineItems {
                siphons: self.siphons,
                jugs_6l: self.jugs_6l,
                jugs_12l: self.jugs_12l,
            },
            self.paid,
            Returns {
                siphons: self.returned_siphons,
                jugs: self.returned_jugs,
            },
        )?;
        Ok(draft)
    }
}

pub async fn create_client(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<CreateClient>,
) -> Result<(StatusCode, Json<Client>), ApiError> {
    let name = validate::client_name(&body.name)?;
    let phone = validate::phone(body.phone.as_deref())?;
    let opening = ClientBalance {
        debt: body.debt,
        siphons_held: validate::non_negative("siphons_held", body.siphons_held)?,
        jugs_held: validate::non_negative("jugs_held", body.jugs_held)?,
    };

    let client = state
        .storage()
        .clients()
        .insert(&NewClient {
            name: &name,
            phone: phone.as_deref(),
            opening,
            created_at: state.now(),
        })
        .await?;

    info!(stage = "clients", client_id = client.id, user_id = user.id, "client created");
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn search_clients(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Client>>, ApiError> {
    let fragment = query
        .name
        .ok_or_else(|| ApiError::invalid_input("query parameter 'name' is required"))?;
    let clients = state.storage().clients().search(fragment.trim()).await?;
    Ok(Json(clients))
}

pub async fn get_client(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Client>, ApiError> {
    state
        .storage()
        .clients()
        .fetch(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("client {id} not found")))
}

/// Manual correction of client details and balances.
pub async fn update_client(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdateClient>,
) -> Result<Json<Client>, ApiError> {
    let update = ClientUpdate {
        name: body.name.as_deref().map(validate::client_name).transpose()?,
        phone: validate::phone(body.phone.as_deref())?,
        debt: body.debt,
        siphons_held: body
            .siphons_held
            .map(|value| validate::non_negative("siphons_held", value))
            .transpose()?,
        jugs_held: body
            .jugs_held
            .map(|value| validate::non_negative("jugs_held", value))
            .transpose()?,
    };

    let client = state
        .storage()
        .clients()
        .update_details(id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("client {id} not found")))?;

    info!(stage = "clients", client_id = id, user_id = user.id, "client updated");
    Ok(Json(client))
}

pub async fn delete_client(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Client>, ApiError> {
    let client = state
        .storage()
        .clients()
        .delete(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("client {id} not found")))?;

    info!(stage = "clients", client_id = id, user_id = admin.id, "client deleted");
    Ok(Json(client))
}

pub async fn list_purchases(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<Purchase>>, ApiError> {
    if state.storage().clients().fetch(id).await?.is_none() {
        return Err(ApiError::not_found(format!("client {id} not found")));
    }
    let purchases = state.storage().purchases().list_for_client(id).await?;
    Ok(Json(purchases))
}

pub async fn create_purchase(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(client_id): ApiPath<i64>,
    ApiJson(body): ApiJson<CreatePurchase>,
) -> Result<(StatusCode, Json<LedgerReceipt>), ApiError> {
    let draft = body.into_draft()?;
    let receipt = state.ledger().record_purchase(client_id, &draft).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn modify_purchase(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(purchase_id): ApiPath<i64>,
    ApiJson(body): ApiJson<ModifyPurchase>,
) -> Result<Json<LedgerReceipt>, ApiError> {
    let draft = body.into_draft()?;
    let receipt = state.ledger().modify_purchase(purchase_id, &draft).await?;
    Ok(Json(receipt))
}

pub async fn delete_purchase(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(purchase_id): ApiPath<i64>,
) -> Result<Json<LedgerReceipt>, ApiError> {
    let receipt = state.ledger().remove_purchase(purchase_id).await?;
    Ok(Json(receipt))
}
