//! # GeoClustering Coordinator
//!
//! Entry point for a batch of incoming orders. Expired orders are cancelled
//! while the valid ones are clustered, and each cluster is handed to the
//! runtime as an independent execution. The coordinator does not wait for
//! those executions to finish.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::runtime::DispatchRuntime;
use crate::error::Result;
use crate::events::DispatchLifecycleEvent;
use crate::execution::message_protocols::{
    CancelOrdersRequest, FilterExpiredOrdersRequest, GeoClusteringRequest,
};
use crate::log_saga;
use crate::models::{Order, OrderId};
use crate::resilience::retry_with_backoff;

/// What one coordinator pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorRun {
    pub batch_id: Uuid,
    pub valid: usize,
    pub expired: usize,
    pub cancelled: Vec<OrderId>,
    /// Set when the cancel branch failed; never fatal to clustering
    pub cancel_error: Option<String>,
    /// Started cluster executions
    pub executions: Vec<Uuid>,
    /// Set when clustering or a cluster start failed
    pub clustering_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeoClusteringCoordinator {
    runtime: Arc<DispatchRuntime>,
}

impl GeoClusteringCoordinator {
    pub fn new(runtime: Arc<DispatchRuntime>) -> Self {
        Self { runtime }
    }

    /// Filter, then cancel and cluster concurrently. Returns once every
    /// cluster execution has been started.
    #[instrument(skip_all, fields(orders = orders.len()))]
    pub async fn run(&self, orders: Vec<Order>) -> Result<CoordinatorRun> {
        let ctx = self.runtime.context();
        let batch_id = Uuid::new_v4();

        let request = FilterExpiredOrdersRequest { orders };
        let filtered = retry_with_backoff("filterExpiredOrders", &ctx.step_policy(), |_| {
            ctx.invoker.invoke_typed(&request)
        })
        .await?;

        log_saga!(info, "ORDERS_FILTERED", execution_id: batch_id, valid: filtered.valid.len(), expired: filtered.expired.len());
        ctx.events.publish(DispatchLifecycleEvent::OrdersFiltered {
            batch_id,
            valid: filtered.valid.len(),
            expired: filtered.expired.len(),
        });

        let mut run = CoordinatorRun {
            batch_id,
            valid: filtered.valid.len(),
            expired: filtered.expired.len(),
            ..CoordinatorRun::default()
        };

        let (cancelled, clustered) = tokio::join!(
            self.cancel_expired(batch_id, filtered.expired),
            self.cluster_and_start(batch_id, filtered.valid),
        );

        match cancelled {
            Ok(ids) => run.cancelled = ids,
            Err(reason) => run.cancel_error = Some(reason),
        }
        match clustered {
            Ok(executions) => run.executions = executions,
            Err((executions, reason)) => {
                run.executions = executions;
                run.clustering_error = Some(reason);
            }
        }

        info!(
            batch_id = %batch_id,
            executions = run.executions.len(),
            cancelled = run.cancelled.len(),
            "Coordinator pass complete"
        );
        Ok(run)
    }

    async fn cancel_expired(&self, batch_id: Uuid, expired: Vec<Order>) -> std::result::Result<Vec<OrderId>, String> {
        if expired.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.runtime.context();
        let request = CancelOrdersRequest { orders: expired };

        match retry_with_backoff("cancelOrders", &ctx.step_policy(), |_| {
            ctx.invoker.invoke_typed(&request)
        })
        .await
        {
            Ok(response) => {
                ctx.events.publish(DispatchLifecycleEvent::OrdersCancelled {
                    batch_id,
                    cancelled: response.cancelled.clone(),
                });
                Ok(response.cancelled)
            }
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Cancelling expired orders failed");
                Err(e.to_string())
            }
        }
    }

    /// Started executions, plus the error that stopped the branch if any
    async fn cluster_and_start(
        &self,
        batch_id: Uuid,
        valid: Vec<Order>,
    ) -> std::result::Result<Vec<Uuid>, (Vec<Uuid>, String)> {
        if valid.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.runtime.context();
        let request = GeoClusteringRequest {
            orders: valid,
            bias: ctx.config.clustering.bias,
        };

        let clusters = match retry_with_backoff("geoClustering", &ctx.step_policy(), |_| {
            ctx.invoker.invoke_typed(&request)
        })
        .await
        {
            Ok(response) => response.clusters,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Clustering failed; batch not dispatched");
                return Err((Vec::new(), e.to_string()));
            }
        };

        ctx.events.publish(DispatchLifecycleEvent::ClustersFormed {
            batch_id,
            clusters: clusters.len(),
        });

        let mut started = Vec::with_capacity(clusters.len());
        let mut first_error = None;
        for cluster in clusters.into_iter().filter(|cluster| !cluster.is_empty()) {
            match self.runtime.start_cluster(cluster).await {
                Ok(execution_id) => started.push(execution_id),
                Err(e) => {
                    warn!(batch_id = %batch_id, error = %e, "Could not start cluster execution");
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        match first_error {
            None => Ok(started),
            Some(reason) => Err((started, reason)),
        }
    }
}
