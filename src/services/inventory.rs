//! `grocery.InventoryService` gRPC surface.
//!
//! Translates wire messages into orchestrator calls. Business rejections
//! (insufficient stock, failed publish) are answered in-band with
//! `success = false`; validation and infrastructure failures become statuses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Timestamp;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::fulfillment::FulfillmentOrchestrator;
use crate::order::{CompletionReport, OrderClass, OrderKey, StockDelivery};
use crate::proto::inventory_service_server::InventoryService as InventoryServiceTrait;
use crate::proto::{
    CheckAvailabilityRequest, CheckAvailabilityResponse, DispatchResponse,
    GetInventoryMetricsRequest, GetInventoryMetricsResponse, InventoryMetric, ItemDetail,
    ProcessCustomerOrderRequest, ReleaseItemsRequest, ReleaseItemsResponse, ReportJobStatusRequest,
    ReportJobStatusResponse, ReserveItemsRequest, ReserveItemsResponse, RestockItem,
    RestockItemsOrderRequest,
};

/// Inventory gRPC service backed by the fulfillment orchestrator.
pub struct InventoryService {
    orchestrator: Arc<FulfillmentOrchestrator>,
}

impl InventoryService {
    pub fn new(orchestrator: Arc<FulfillmentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

fn to_wire(quantity: u32) -> i32 {
    i32::try_from(quantity).unwrap_or(i32::MAX)
}

fn from_wire_items(items: HashMap<String, i32>) -> Result<BTreeMap<String, u32>, Status> {
    items
        .into_iter()
        .map(|(sku, qty)| {
            u32::try_from(qty)
                .map(|q| (sku.clone(), q))
                .map_err(|_| {
                    Status::invalid_argument(format!("quantity for '{}' must not be negative", sku))
                })
        })
        .collect()
}

fn to_wire_items(items: BTreeMap<String, u32>) -> HashMap<String, i32> {
    items.into_iter().map(|(sku, q)| (sku, to_wire(q))).collect()
}

fn to_date(ts: &Timestamp, field: &str, sku: &str) -> Result<NaiveDate, Status> {
    let nanos = u32::try_from(ts.nanos).unwrap_or(0);
    DateTime::<Utc>::from_timestamp(ts.seconds, nanos)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| Status::invalid_argument(format!("{} for '{}' is out of range", field, sku)))
}

/// Missing manufacture dates default to today; expiry dates are required.
fn to_delivery(item: RestockItem) -> Result<StockDelivery, Status> {
    let quantity = u32::try_from(item.quantity).map_err(|_| {
        Status::invalid_argument(format!("quantity for '{}' must not be negative", item.sku))
    })?;
    let mfd_date = match item.mfd_date.as_ref() {
        Some(ts) => to_date(ts, "mfd_date", &item.sku)?,
        None => Utc::now().date_naive(),
    };
    let expiry_date = item
        .expiry_date
        .as_ref()
        .ok_or_else(|| Status::invalid_argument(format!("expiry_date for '{}' is required", item.sku)))
        .and_then(|ts| to_date(ts, "expiry_date", &item.sku))?;

    Ok(StockDelivery {
        sku: item.sku,
        name: item.name,
        aisle: item.aisle_type,
        quantity,
        unit_cost: item.unit_cost,
        mfd_date,
        expiry_date,
    })
}

#[tonic::async_trait]
impl InventoryServiceTrait for InventoryService {
    async fn check_availability(
        &self,
        request: Request<CheckAvailabilityRequest>,
    ) -> Result<Response<CheckAvailabilityResponse>, Status> {
        let req = request.into_inner();
        let records = self.orchestrator.check_availability(&req.skus).await?;

        let items = records
            .into_iter()
            .map(|(sku, r)| {
                (
                    sku,
                    ItemDetail {
                        sku: r.sku,
                        name: r.name,
                        aisle_type: r.aisle,
                        quantity_available: to_wire(r.quantity),
                    },
                )
            })
            .collect();

        Ok(Response::new(CheckAvailabilityResponse { items }))
    }

    async fn reserve_items(
        &self,
        request: Request<ReserveItemsRequest>,
    ) -> Result<Response<ReserveItemsResponse>, Status> {
        let req = request.into_inner();
        let items = from_wire_items(req.items)?;

        match self.orchestrator.reserve(&req.order_id, &items).await {
            Ok(taken) => Ok(Response::new(ReserveItemsResponse {
                order_id: req.order_id,
                items: to_wire_items(taken),
                success: true,
                error_message: String::new(),
            })),
            Err(e) if e.is_business_rejection() => Ok(Response::new(ReserveItemsResponse {
                order_id: req.order_id,
                items: Default::default(),
                success: false,
                error_message: e.to_string(),
            })),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_items(
        &self,
        request: Request<ReleaseItemsRequest>,
    ) -> Result<Response<ReleaseItemsResponse>, Status> {
        let req = request.into_inner();
        let items = from_wire_items(req.items)?;
        self.orchestrator.release(&req.order_id, &items).await?;
        Ok(Response::new(ReleaseItemsResponse { success: true }))
    }

    async fn process_customer_order(
        &self,
        request: Request<ProcessCustomerOrderRequest>,
    ) -> Result<Response<DispatchResponse>, Status> {
        let req = request.into_inner();
        let items = from_wire_items(req.items)?;
        let outcome = self
            .orchestrator
            .dispatch_client_order(&req.order_id, &items)
            .await?;
        Ok(Response::new(DispatchResponse {
            success: outcome.is_success(),
            message: outcome.message(),
        }))
    }

    async fn restock_items_order(
        &self,
        request: Request<RestockItemsOrderRequest>,
    ) -> Result<Response<DispatchResponse>, Status> {
        let req = request.into_inner();
        let lines = req
            .items
            .into_iter()
            .map(to_delivery)
            .collect::<Result<Vec<_>, _>>()?;
        let outcome = self
            .orchestrator
            .dispatch_restock_order(&req.order_id, lines)
            .await?;
        Ok(Response::new(DispatchResponse {
            success: outcome.is_success(),
            message: outcome.message(),
        }))
    }

    async fn report_job_status(
        &self,
        request: Request<ReportJobStatusRequest>,
    ) -> Result<Response<ReportJobStatusResponse>, Status> {
        let req = request.into_inner();
        let class: OrderClass = req.order_type.parse().map_err(|e| {
            warn!(order_id = %req.order_id, robot_id = %req.robot_id, "Report with unknown order type");
            Status::invalid_argument(format!("{}", e))
        })?;
        let processed = from_wire_items(req.processed_items)?;

        let progress = self
            .orchestrator
            .report_completion(CompletionReport {
                key: OrderKey::new(class, req.order_id),
                worker_id: req.robot_id,
                status: req.status,
                processed,
            })
            .await?;
        if progress.settling {
            info!(count = progress.count, "Fleet finished, settlement started");
        }
        Ok(Response::new(ReportJobStatusResponse { success: true }))
    }

    async fn get_inventory_metrics(
        &self,
        _request: Request<GetInventoryMetricsRequest>,
    ) -> Result<Response<GetInventoryMetricsResponse>, Status> {
        let metrics = self
            .orchestrator
            .inventory_metrics()
            .await
            .map_err(Status::from)?
            .into_iter()
            .map(|m| InventoryMetric {
                sku: m.sku,
                quantity: to_wire(m.quantity),
                unit_cost: m.unit_cost,
            })
            .collect();
        Ok(Response::new(GetInventoryMetricsResponse { metrics }))
    }
}
