//! gRPC client for the pricing collaborator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::debug;

use super::{Bill, BillLine, PricingService, Result, SettlementError};
use crate::ledger::StockMetric;
use crate::proto::pricing_service_client::PricingServiceClient;
use crate::proto::{CalculateBillRequest, CartItem, InventoryMetric, UpdateStockMetricsRequest};
use crate::transport::lazy_channel;

/// `PricingService` backed by the remote `grocery.PricingService`.
#[derive(Clone)]
pub struct GrpcPricingService {
    client: PricingServiceClient<Channel>,
}

impl GrpcPricingService {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: PricingServiceClient::new(channel),
        }
    }

    /// Build a client whose connection is established on first call.
    pub fn connect_lazy(address: &str) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::new(lazy_channel(address)?))
    }
}

fn wire_quantity(sku: &str, quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| SettlementError::Pricing(format!("quantity {} for '{}' too large", quantity, sku)))
}

#[async_trait]
impl PricingService for GrpcPricingService {
    async fn calculate_bill(&self, items: &BTreeMap<String, u32>) -> Result<Bill> {
        let items = items
            .iter()
            .map(|(sku, qty)| {
                Ok(CartItem {
                    sku: sku.clone(),
                    quantity: wire_quantity(sku, *qty)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .clone()
            .calculate_bill(CalculateBillRequest { items })
            .await
            .map_err(|status| SettlementError::Pricing(status.message().to_string()))?
            .into_inner();

        let lines = response
            .items
            .into_iter()
            .map(|line| BillLine {
                quantity: u32::try_from(line.quantity).unwrap_or(0),
                sku: line.sku,
                name: line.name,
                unit_price: line.unit_price,
                total_price: line.total_price,
            })
            .collect();

        debug!(grand_total = response.grand_total, "Bill calculated");
        Ok(Bill {
            lines,
            grand_total: response.grand_total,
        })
    }

    async fn update_stock_metrics(&self, metrics: Vec<StockMetric>) -> Result<()> {
        let updates = metrics
            .into_iter()
            .map(|m| {
                Ok(InventoryMetric {
                    quantity: wire_quantity(&m.sku, m.quantity)?,
                    sku: m.sku,
                    unit_cost: m.unit_cost,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .clone()
            .update_stock_metrics(UpdateStockMetricsRequest { updates })
            .await
            .map_err(|status| SettlementError::Pricing(status.message().to_string()))?
            .into_inner();

        if !response.success {
            return Err(SettlementError::Pricing(
                "pricing service rejected stock metrics".to_string(),
            ));
        }
        Ok(())
    }
}
