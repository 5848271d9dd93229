//! Completion sinks: in-process orchestrator and remote inventory service.

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Code;

use super::{CompletionSink, FleetError, Result};
use crate::fulfillment::{FulfillmentError, FulfillmentOrchestrator};
use crate::order::CompletionReport;
use crate::proto::inventory_service_client::InventoryServiceClient;
use crate::proto::ReportJobStatusRequest;

#[async_trait]
impl CompletionSink for FulfillmentOrchestrator {
    async fn report(&self, report: CompletionReport) -> Result<()> {
        match self.report_completion(report).await {
            Ok(_) => Ok(()),
            Err(e @ FulfillmentError::InvalidArgument(_)) => Err(FleetError::Rejected(e.to_string())),
            Err(e) => Err(FleetError::Unavailable(e.to_string())),
        }
    }
}

/// Reports over `grocery.InventoryService/ReportJobStatus`.
#[derive(Clone)]
pub struct GrpcCompletionSink {
    client: InventoryServiceClient<Channel>,
}

impl GrpcCompletionSink {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: InventoryServiceClient::new(channel),
        }
    }
}

fn to_request(report: CompletionReport) -> ReportJobStatusRequest {
    ReportJobStatusRequest {
        order_id: report.key.order_id,
        order_type: report.key.class.as_str().to_string(),
        robot_id: report.worker_id,
        status: report.status,
        processed_items: report
            .processed
            .into_iter()
            .map(|(sku, q)| (sku, i32::try_from(q).unwrap_or(i32::MAX)))
            .collect(),
    }
}

#[async_trait]
impl CompletionSink for GrpcCompletionSink {
    async fn report(&self, report: CompletionReport) -> Result<()> {
        self.client
            .clone()
            .report_job_status(to_request(report))
            .await
            .map_err(|status| match status.code() {
                Code::InvalidArgument | Code::FailedPrecondition => {
                    FleetError::Rejected(status.message().to_string())
                }
                _ => FleetError::Unavailable(status.message().to_string()),
            })?;
        Ok(())
    }
}
