use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use soderia_core::types::Product;
use soderia_core::validate;

use crate::auth::{AdminUser, StaffUser};
use crate::error::{ApiError, ApiJson, ApiPath};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct PriceUpdate {
    price: i64,
}

pub async fn list_products(
    State(state): State<AppState>,
    _staff: StaffUser,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.storage().products().list().await?))
}

/// Changes a catalog price. Existing purchases keep their stored totals.
pub async fn update_price(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<PriceUpdate>,
) -> Result<Json<Product>, ApiError> {
    let price = validate::non_negative("price", body.price)?;
    let product = state
        .storage()
        .products()
        .update_price(id, price)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("product {id} not found")))?;

    info!(
        stage = "stock",
        product_id = id,
        product = %product.name,
        price,
        user_id = admin.id,
        "price updated"
    );
    Ok(Json(product))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::router::app_router;
    use crate::testing::{send_json, setup_state, sign_in};

    #[tokio::test]
    async fn staff_list_products_and_admins_reprice() {
        let app = app_router(setup_state().await);
        let admin = sign_in(&app, "owner").await;
        let clerk = sign_in(&app, "clerk").await;

        let (status, _) =
            send_json(&app, "GET", "/app/stock/products", Some(&clerk), json!(null)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, products) =
            send_json(&app, "GET", "/app/stock/products", Some(&admin), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        let products = products.as_array().expect("products");
        assert_eq!(products.len(), 3);
        assert_eq!(products[0]["name"], "siphon");
        assert_eq!(products[0]["price"], 30);
        let siphon_id = products[0]["id"].as_i64().expect("id");

        let uri = format!("/app/stock/products/{siphon_id}");
        let (status, _) = send_json(&app, "PUT", &uri, Some(&clerk), json!({ "price": 35 })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        for invalid in [json!({ "price": -1 }), json!({ "price": "35" }), json!({})] {
            let (status, _) = send_json(&app, "PUT", &uri, Some(&admin), invalid).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, updated) =
            send_json(&app, "PUT", &uri, Some(&admin), json!({ "price": 35 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["price"], 35);

        let (status, _) = send_json(
            &app,
            "PUT",
            "/app/stock/products/999",
            Some(&admin),
            json!({ "price": 35 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, client) =
            send_json(&app, "POST", "/app/clients", Some(&admin), json!({ "name": "Ana" })).await;
        let (_, receipt) = send_json(
            &app,
            "POST",
            &format!("/app/clients/{}/purchases", client["id"]),
            Some(&admin),
            json!({ "siphons": 2 }),
        )
        .await;
        assert_eq!(receipt["purchase"]["total"], 70);
    }
}
