//! Typed request/response shapes for every command
//!
//! Field names are camelCase on the wire. Responses tolerate missing optional
//! fields so handlers that only acknowledge can return `{}` or `null`.

use super::command::CommandType;
use crate::constants::BatchUpdateStatus;
use crate::models::{Assignment, Cluster, Coordinates, DriverId, Order, OrderId, OrderLockEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binds a request type to its command and response type
pub trait CommandRequest: Serialize + Send + Sync {
    const COMMAND: CommandType;
    type Response: DeserializeOwned + Send;
}

/// Empty acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledged {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterExpiredOrdersRequest {
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterExpiredOrdersResponse {
    #[serde(default)]
    pub valid: Vec<Order>,
    #[serde(default)]
    pub expired: Vec<Order>,
}

impl CommandRequest for FilterExpiredOrdersRequest {
    const COMMAND: CommandType = CommandType::FilterExpiredOrders;
    type Response = FilterExpiredOrdersResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrdersRequest {
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelOrdersResponse {
    /// Orders actually moved to CANCELLED; orders already past NEW are skipped
    #[serde(default)]
    pub cancelled: Vec<OrderId>,
}

impl CommandRequest for CancelOrdersRequest {
    const COMMAND: CommandType = CommandType::CancelOrders;
    type Response = CancelOrdersResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoClusteringRequest {
    pub orders: Vec<Order>,
    /// Granularity control: smaller values produce more, smaller clusters
    pub bias: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoClusteringResponse {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

impl CommandRequest for GeoClusteringRequest {
    const COMMAND: CommandType = CommandType::GeoClustering;
    type Response = GeoClusteringResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeDispatchRequest {
    pub centroid: Coordinates,
    pub orders: Vec<Order>,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeDispatchResponse {
    pub problem_id: String,
}

impl CommandRequest for InvokeDispatchRequest {
    const COMMAND: CommandType = CommandType::InvokeDispatch;
    type Response = InvokeDispatchResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDispatchRequest {
    pub problem_id: String,
    pub centroid: Coordinates,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDispatchResponse {
    pub in_progress: bool,
    #[serde(default)]
    pub unassigned: Vec<Order>,
    #[serde(default)]
    pub assigned: Vec<Assignment>,
}

impl CommandRequest for QueryDispatchRequest {
    const COMMAND: CommandType = CommandType::QueryDispatch;
    type Response = QueryDispatchResponse;
}

/// Republish orders onto the ingestion stream for a later dispatch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToKinesisRequest {
    pub orders: Vec<Order>,
    /// `null` when no order status was ever touched (lock not acquired)
    #[serde(default)]
    pub orders_released: Option<Vec<OrderId>>,
}

impl CommandRequest for SendToKinesisRequest {
    const COMMAND: CommandType = CommandType::SendToKinesis;
    type Response = Acknowledged;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDriverRequest {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub orders: Vec<Order>,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDriverResponse {
    pub locked: bool,
}

impl CommandRequest for LockDriverRequest {
    const COMMAND: CommandType = CommandType::LockDriver;
    type Response = LockDriverResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrdersStatusRequest {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub orders: Vec<Order>,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrdersStatusResponse {
    pub status: BatchUpdateStatus,
    #[serde(default)]
    pub status_list: Vec<OrderLockEntry>,
}

impl CommandRequest for UpdateOrdersStatusRequest {
    const COMMAND: CommandType = CommandType::UpdateOrdersStatus;
    type Response = UpdateOrdersStatusResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToDriverRequest {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub driver_location: Coordinates,
    pub orders: Vec<Order>,
}

impl CommandRequest for SendToDriverRequest {
    const COMMAND: CommandType = CommandType::SendToDriver;
    type Response = Acknowledged;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDriverLockRequest {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseDriverLockResponse {
    /// False when the lock was already gone (idempotent replay)
    #[serde(default)]
    pub released: bool,
}

impl CommandRequest for ReleaseDriverLockRequest {
    const COMMAND: CommandType = CommandType::ReleaseDriverLock;
    type Response = ReleaseDriverLockResponse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOrdersLockRequest {
    pub driver_id: DriverId,
    pub driver_identity: String,
    pub orders: Vec<Order>,
    pub order_status_list: Vec<OrderLockEntry>,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseOrdersLockResponse {
    #[serde(default)]
    pub released: Vec<OrderId>,
}

impl CommandRequest for ReleaseOrdersLockRequest {
    const COMMAND: CommandType = CommandType::ReleaseOrdersLock;
    type Response = ReleaseOrdersLockResponse;
}
