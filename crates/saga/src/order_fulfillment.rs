//! Order saga constants.

/// Broker channel carrying cancellation notifications.
pub const ORDER_CANCELLED_CHANNEL: &str = "order.cancelled";

/// Status literal sent in cancellation notifications.
pub const CANCELLED_STATUS: &str = "CANCELLED";

/// Timestamp layout used on the wire (`YYYY-MM-DDTHH:MM:SSZ`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
