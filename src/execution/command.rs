//! Command vocabulary shared by the saga and every external handler

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every command the dispatch saga issues
///
/// Serialized with the wire names handlers register under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandType {
    // Coordinator
    #[serde(rename = "filterExpiredOrders")]
    FilterExpiredOrders,
    #[serde(rename = "cancelOrders")]
    CancelOrders,
    #[serde(rename = "geoClustering")]
    GeoClustering,

    // Solver
    #[serde(rename = "invokeDispatch")]
    InvokeDispatch,
    #[serde(rename = "queryDispatch")]
    QueryDispatch,

    // Recycling and notification
    #[serde(rename = "sendToKinesis")]
    SendToKinesis,
    #[serde(rename = "sendToDriver")]
    SendToDriver,

    // Locking
    #[serde(rename = "lockDriver")]
    LockDriver,
    #[serde(rename = "updateOrdersStatus")]
    UpdateOrdersStatus,
    #[serde(rename = "releaseDriverLock")]
    ReleaseDriverLock,
    #[serde(rename = "releaseOrdersLock")]
    ReleaseOrdersLock,
}

impl CommandType {
    pub const ALL: [CommandType; 11] = [
        Self::FilterExpiredOrders,
        Self::CancelOrders,
        Self::GeoClustering,
        Self::InvokeDispatch,
        Self::QueryDispatch,
        Self::SendToKinesis,
        Self::SendToDriver,
        Self::LockDriver,
        Self::UpdateOrdersStatus,
        Self::ReleaseDriverLock,
        Self::ReleaseOrdersLock,
    ];

    /// Wire name of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilterExpiredOrders => "filterExpiredOrders",
            Self::CancelOrders => "cancelOrders",
            Self::GeoClustering => "geoClustering",
            Self::InvokeDispatch => "invokeDispatch",
            Self::QueryDispatch => "queryDispatch",
            Self::SendToKinesis => "sendToKinesis",
            Self::SendToDriver => "sendToDriver",
            Self::LockDriver => "lockDriver",
            Self::UpdateOrdersStatus => "updateOrdersStatus",
            Self::ReleaseDriverLock => "releaseDriverLock",
            Self::ReleaseOrdersLock => "releaseOrdersLock",
        }
    }

    /// Release commands run on the compensation path
    pub fn is_compensation(&self) -> bool {
        matches!(self, Self::ReleaseDriverLock | Self::ReleaseOrdersLock)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| format!("Unknown command: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for command in CommandType::ALL {
            let json = serde_json::to_string(&command).unwrap();
            assert_eq!(json, format!("\"{}\"", command.as_str()));
            assert_eq!(command.as_str().parse::<CommandType>().unwrap(), command);
        }
        assert!("sendToSlack".parse::<CommandType>().is_err());
    }

    #[test]
    fn test_compensation_commands() {
        assert!(CommandType::ReleaseDriverLock.is_compensation());
        assert!(CommandType::ReleaseOrdersLock.is_compensation());
        assert!(!CommandType::LockDriver.is_compensation());
    }
}
