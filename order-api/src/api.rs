use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use shared::events::{OrderCreated, OrderItem};
use shared::{DomainEvent, Envelope, EventPublisher};

const REQUIRED: &str = "customerId and items[] are required";
const BAD_ITEM: &str = "every item needs a sku and a positive qty";

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn EventPublisher>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

struct NewOrder {
    customer_id: String,
    items: Vec<OrderItem>,
    note: Option<String>,
}

/// Validated by hand so a bad shape answers with this API's `{error}`
/// body instead of an extractor rejection.
fn parse_order(body: &Value) -> Result<NewOrder, &'static str> {
    let customer_id = body
        .get("customerId")
        .and_then(Value::as_str)
        .filter(|customer_id| !customer_id.is_empty())
        .ok_or(REQUIRED)?;
    let raw_items = body.get("items").and_then(Value::as_array).ok_or(REQUIRED)?;

    let mut items = Vec::with_capacity(raw_items.len());
    for item in raw_items {
        let sku = item
            .get("sku")
            .and_then(Value::as_str)
            .filter(|sku| !sku.is_empty())
            .ok_or(BAD_ITEM)?;
        let qty = item
            .get("qty")
            .and_then(Value::as_i64)
            .filter(|qty| *qty > 0 && *qty <= i64::from(i32::MAX))
            .ok_or(BAD_ITEM)?;
        items.push(OrderItem {
            sku: sku.to_string(),
            qty: qty as i32,
        });
    }

    Ok(NewOrder {
        customer_id: customer_id.to_string(),
        items,
        note: body.get("note").and_then(Value::as_str).map(str::to_string),
    })
}

/// Fire-and-forget beyond validation: once the broker confirms the
/// `order.created` publish the caller gets a 202 and everything further
/// happens on the bus.
async fn create_order(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let order = match parse_order(&body) {
        Ok(order) => order,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let order_id = format!("ord_{}", Uuid::new_v4());
    let event = DomainEvent::OrderCreated(OrderCreated {
        order_id: order_id.clone(),
        customer_id: order.customer_id,
        items: order.items,
        note: order.note,
    });
    let envelope = Envelope::new(&event, &order_id);

    match state.publisher.publish(&envelope).await {
        Ok(()) => {
            tracing::info!("Accepted order {}", order_id);
            (
                StatusCode::ACCEPTED,
                [("x-idempotency-key", envelope.idempotency_key)],
                Json(json!({ "accepted": true, "orderId": order_id })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to publish order {}: {}", order_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to accept order: {}", e) })),
            )
                .into_response()
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
