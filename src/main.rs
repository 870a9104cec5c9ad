//! Keymart - storefront service for digital access credentials.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use keymart::config::AppConfig;
use keymart::domain::aggregates::OrderSnapshot;
use keymart::engine::{AllocationEngine, AllocationOutcome};
use keymart::notify::{LogNotifier, NatsNotifier, Notifier};
use keymart::service::{
    catalog::{CreateProductRequest, UpdateProductRequest, VariationRequest},
    inventory::{CreateCredentialRequest, ImportRequest},
    orders::{CheckoutRequest, ConfirmPaymentRequest, PaymentEvent},
    CatalogService, InventoryService, OrderService,
};
use keymart::store::{InventoryStore, PgInventoryStore};

#[derive(Clone)]
struct AppState {
    catalog: CatalogService,
    inventory: InventoryService,
    orders: OrderService,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PgInventoryStore::new(db);
    store.migrate().await?;
    let store: Arc<dyn InventoryStore> = Arc::new(store);

    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => {
            let client = async_nats::connect(url).await?;
            Arc::new(NatsNotifier::new(client, config.notify_subject_prefix.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let engine = AllocationEngine::new(store.clone(), notifier.clone());
    let state = AppState {
        catalog: CatalogService::new(store.clone()),
        inventory: InventoryService::new(store.clone(), notifier.clone()),
        orders: OrderService::new(store, engine, notifier),
    };

    // Background sweep of abandoned pending orders.
    let sweeper = state.orders.clone();
    let ttl = config.stale_order_ttl_minutes;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tick.tick().await;
            if let Err(e) = sweeper.cancel_stale(ttl).await {
                tracing::warn!(error = %e, "stale order sweep failed");
            }
        }
    });

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "keymart"})) }))
        .route("/api/v1/storefront", get(storefront))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/api/v1/products/:id/variations", post(add_variation))
        .route("/api/v1/products/:id/variations/:vid", delete(delete_variation))
        .route("/api/v1/credentials", post(create_credential))
        .route("/api/v1/credentials/import", post(import_credentials))
        .route("/api/v1/credentials/:id", get(get_credential).delete(delete_credential))
        .route("/api/v1/orders", get(list_orders).post(checkout))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/confirm", post(confirm_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/resend", post(resend_order))
        .route("/api/v1/webhooks/payment", post(payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("keymart listening on 0.0.0.0:{}", config.port);
    axum::serve(
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?,
        app,
    )
    .await?;
    Ok(())
}

type ApiError = (StatusCode, String);

fn http_err(e: keymart::Error) -> ApiError {
    use keymart::Error::*;
    let status = match &e {
        Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        NotFound(_) => StatusCode::NOT_FOUND,
        Conflict(_) => StatusCode::CONFLICT,
        Storage(_) | Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn storefront(State(s): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let products = s.catalog.storefront().await.map_err(http_err)?;
    Ok(Json(serde_json::json!({ "products": products })))
}

async fn list_products(State(s): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let products = s.catalog.all_products().await.map_err(http_err)?;
    Ok(Json(serde_json::json!({ "products": products })))
}

async fn create_product(
    State(s): State<AppState>,
    Json(r): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let p = s.catalog.create_product(r).await.map_err(http_err)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(p))))
}

async fn get_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let p = s.catalog.product_view(id).await.map_err(http_err)?;
    Ok(Json(serde_json::json!(p)))
}

async fn update_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateProductRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let p = s.catalog.update_product(id, r).await.map_err(http_err)?;
    Ok(Json(serde_json::json!(p)))
}

async fn delete_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    s.catalog.delete_product(id).await.map_err(http_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_variation(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<VariationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let v = s.catalog.add_variation(id, r).await.map_err(http_err)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(v))))
}

async fn delete_variation(
    State(s): State<AppState>,
    Path((id, vid)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    s.catalog.delete_variation(id, vid).await.map_err(http_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_credential(
    State(s): State<AppState>,
    Json(r): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let c = s.inventory.add_credential(r).await.map_err(http_err)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(c))))
}

async fn import_credentials(
    State(s): State<AppState>,
    Json(r): Json<ImportRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let summary = s.inventory.import(r).await.map_err(http_err)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(summary))))
}

async fn get_credential(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let c = s.inventory.credential(id).await.map_err(http_err)?;
    Ok(Json(serde_json::json!(c)))
}

async fn delete_credential(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    s.inventory.remove_credential(id).await.map_err(http_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn checkout(
    State(s): State<AppState>,
    Json(r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderSnapshot>), ApiError> {
    let order = s.orders.checkout(r).await.map_err(http_err)?;
    Ok((StatusCode::CREATED, Json(order.snapshot())))
}

async fn list_orders(State(s): State<AppState>) -> Result<Json<Vec<OrderSnapshot>>, ApiError> {
    let orders = s.orders.orders().await.map_err(http_err)?;
    Ok(Json(orders.iter().map(|o| o.snapshot()).collect()))
}

async fn get_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let order = s.orders.order(id).await.map_err(http_err)?;
    Ok(Json(order.snapshot()))
}

/// Manual `pending -> paid`, for payments settled outside the provider.
/// Allocation is a separate step; the admin retries through the webhook or
/// the resend endpoint once stock exists.
async fn confirm_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<ConfirmPaymentRequest>,
) -> Result<Json<OrderSnapshot>, ApiError> {
    let payment_id = r.payment_id.unwrap_or_else(|| format!("manual:{id}"));
    let order = s.orders.confirm_payment(id, &payment_id).await.map_err(http_err)?;
    Ok(Json(order.snapshot()))
}

async fn cancel_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderSnapshot>, ApiError> {
    s.orders.cancel(id).await.map_err(http_err)?;
    let order = s.orders.order(id).await.map_err(http_err)?;
    Ok(Json(order.snapshot()))
}

async fn resend_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let assigned = s.orders.resend(id).await.map_err(http_err)?;
    Ok(Json(serde_json::json!({ "resent": true, "order_id": assigned.order_id })))
}

/// Payment collaborator callback. The customer always sees success once the
/// provider confirmed payment; a missing credential is an operator concern.
async fn payment_webhook(
    State(s): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = s.orders.handle_payment_confirmed(event).await.map_err(http_err)?;
    let status = match outcome {
        AllocationOutcome::Delivered(_) => "delivered",
        AllocationOutcome::AlreadyDelivered(_) => "already_delivered",
        AllocationOutcome::NoCredentialAvailable => "pending_fulfillment",
    };
    Ok(Json(serde_json::json!({ "status": status })))
}
