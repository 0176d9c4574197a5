//! Order upsert, read, status and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{ChannelId, OrganizationId};
use domain::{CancellationSource, LineItem, Money, Order, OrderStatus};
use lifecycle::{CancellationInput, CancellationResult, OrderUpsertInput, UpdateStatusInput};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::extract::{OrganizationScope, parse_order_id};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct UpsertOrderRequest {
    #[serde(default)]
    pub status: Option<String>,
    pub total_amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<serde_json::Value>,
    #[serde(default)]
    pub billing_address: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub variant_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub source: Option<CancellationSource>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub organization_id: String,
    pub channel_id: String,
    pub external_id: String,
    pub status: OrderStatus,
    pub total_amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub shipping_address: Option<serde_json::Value>,
    pub billing_address: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub inventory_reserved: bool,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub line_items: Vec<LineItemResponse>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub variant_id: Option<String>,
}

#[derive(Serialize)]
pub struct UpsertOrderResponse {
    pub order: OrderResponse,
    pub created: bool,
    pub updated: bool,
    pub inventory_reserved: bool,
    pub line_items_changed: bool,
}

#[derive(Serialize)]
pub struct StatusChangeResponse {
    pub order: OrderResponse,
    pub previous_status: OrderStatus,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            organization_id: order.organization_id.to_string(),
            channel_id: order.channel_id.to_string(),
            external_id: order.external_id,
            status: order.status,
            total_amount_cents: order.total_amount.cents(),
            currency: order.currency,
            customer_email: order.customer_email,
            customer_name: order.customer_name,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            metadata: order.metadata,
            inventory_reserved: order.inventory_reserved,
            cancellation_reason: order.cancellation_reason,
            cancelled_at: order.cancelled_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
            line_items: order
                .line_items
                .into_iter()
                .map(|item| LineItemResponse {
                    sku: item.sku.to_string(),
                    name: item.name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                    variant_id: item.variant_id,
                })
                .collect(),
        }
    }
}

impl UpsertOrderRequest {
    fn into_input(
        self,
        organization_id: OrganizationId,
        channel_id: String,
        external_id: String,
    ) -> Result<OrderUpsertInput, ApiError> {
        let status = match self.status.as_deref() {
            Some(raw) => parse_status(raw)?,
            None => OrderStatus::default(),
        };
        let line_items = self
            .line_items
            .into_iter()
            .map(|item| {
                let line = LineItem::new(
                    item.sku,
                    item.name,
                    item.quantity,
                    Money::from_cents(item.unit_price_cents),
                );
                match item.variant_id {
                    Some(variant) => line.with_variant(variant),
                    None => line,
                }
            })
            .collect();

        Ok(OrderUpsertInput {
            organization_id,
            channel_id: ChannelId::new(channel_id),
            external_id,
            status,
            total_amount: Money::from_cents(self.total_amount_cents),
            currency: self.currency,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            metadata: self.metadata,
            line_items,
        })
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, ApiError> {
    raw.parse()
        .map_err(|e: domain::OrderError| ApiError::BadRequest(e.to_string()))
}

// -- Handlers --

/// PUT /channels/{channel_id}/orders/{external_id}: record an order event.
///
/// Responds 201 when the order was created, 200 otherwise.
#[tracing::instrument(skip(state, organization, req))]
pub async fn upsert<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    OrganizationScope(organization): OrganizationScope,
    Path((channel_id, external_id)): Path<(String, String)>,
    Json(req): Json<UpsertOrderRequest>,
) -> Result<(StatusCode, Json<UpsertOrderResponse>), ApiError> {
    let input = req.into_input(organization, channel_id, external_id)?;
    let result = state.upserts.upsert_order(input).await?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(UpsertOrderResponse {
            order: result.order.into(),
            created: result.created,
            updated: result.updated,
            inventory_reserved: result.inventory_reserved,
            line_items_changed: result.line_items_changed,
        }),
    ))
}

/// GET /orders/{id}: load one order of the caller's organization.
#[tracing::instrument(skip(state, organization))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    OrganizationScope(organization): OrganizationScope,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(&organization, order_id).await?;
    Ok(Json(order.into()))
}

/// PATCH /orders/{id}/status: move an order along the state machine.
#[tracing::instrument(skip(state, organization, req))]
pub async fn update_status<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    OrganizationScope(organization): OrganizationScope,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusChangeResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status = parse_status(&req.status)?;

    let result = state
        .orders
        .update_status(UpdateStatusInput {
            order_id,
            organization_id: organization,
            status,
        })
        .await?;

    Ok(Json(StatusChangeResponse {
        order: result.order.into(),
        previous_status: result.previous_status,
    }))
}

/// POST /orders/{id}/cancel: cancel an order and release its stock.
#[tracing::instrument(skip(state, organization, req))]
pub async fn cancel<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    OrganizationScope(organization): OrganizationScope,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<CancellationResult>, ApiError> {
    let order_id = parse_order_id(&id)?;

    let result = state
        .orders
        .cancellation()
        .cancel_order(CancellationInput {
            order_id,
            organization_id: organization,
            reason: req.reason,
            note: req.note,
            source: req.source.unwrap_or_default(),
        })
        .await?;

    Ok(Json(result))
}
