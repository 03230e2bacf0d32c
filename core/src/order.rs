//! Order entity, status enumeration and business-key handling.
//!
//! An [`Order`] carries exactly two fields the pipeline understands: its
//! [`OrderId`] and its [`OrderStatus`]. Everything else the upstream producer put
//! on the message (`customerId`, `items`, `timePlaced`, ...) lives in an opaque
//! payload map and is written back unchanged.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "orderId": "42",
//!   "status": 1,
//!   "customerId": "4321",
//!   "items": [{ "productId": 1, "quantity": 2, "price": 12.5 }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the business-key field in every serialized order.
pub const ORDER_ID_FIELD: &str = "orderId";

/// Name of the status field in every serialized order.
pub const STATUS_FIELD: &str = "status";

/// Errors produced while parsing order identifiers or statuses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderParseError {
    /// The order id was empty.
    #[error("order id is empty")]
    EmptyId,

    /// The order id contained something other than ASCII digits.
    #[error("order id {0:?} is not a decimal integer")]
    NonNumericId(String),

    /// The order id does not fit in a signed 64-bit integer.
    #[error("order id {0:?} is out of range")]
    IdOutOfRange(String),

    /// The status integer does not name a known status.
    #[error("unknown order status {0}")]
    UnknownStatus(i64),
}

/// Canonical business key of an order.
///
/// Only digit strings that fit in an `i64` are accepted, and the stored form is
/// always the canonical decimal rendering, so `"007"` and `"7"` address the same
/// order.
///
/// # Example
///
/// ```
/// use makeline_core::order::OrderId;
///
/// let id: OrderId = "007".parse().unwrap();
/// assert_eq!(id.as_str(), "7");
/// assert!("7a".parse::<OrderId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    /// Parses and canonicalizes a raw order id.
    ///
    /// # Errors
    ///
    /// Returns [`OrderParseError`] when `raw` is empty, contains anything other
    /// than ASCII digits, or overflows an `i64`.
    pub fn parse(raw: &str) -> Result<Self, OrderParseError> {
        if raw.is_empty() {
            return Err(OrderParseError::EmptyId);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderParseError::NonNumericId(raw.to_string()));
        }
        let value: i64 = raw
            .parse()
            .map_err(|_| OrderParseError::IdOutOfRange(raw.to_string()))?;
        Ok(Self(value.to_string()))
    }

    /// Returns the canonical decimal rendering.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, used for deterministic ordering.
    #[must_use]
    pub fn numeric(&self) -> i64 {
        // Construction guarantees a canonical i64 rendering.
        self.0.parse().unwrap_or_default()
    }
}

impl FromStr for OrderId {
    type Err = OrderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderId {
    type Error = OrderParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage of an order, serialized as its integer discriminant.
///
/// The enumeration is ordered: user-initiated updates only move forward, and
/// only the intake pipeline produces [`OrderStatus::Pending`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum OrderStatus {
    /// Not yet seen by the intake pipeline.
    #[default]
    New = 0,
    /// Stored by intake, waiting to be worked on.
    Pending = 1,
    /// Being prepared.
    Processing = 2,
    /// Finished.
    Complete = 3,
}

impl OrderStatus {
    /// Whether a status update request may set this status.
    #[must_use]
    pub const fn is_user_settable(self) -> bool {
        matches!(self, Self::Processing | Self::Complete)
    }

    /// Whether a status update may move an order from `self` to `next`.
    ///
    /// Orders advance one stage at a time (Pending to Processing, Processing
    /// to Complete). Setting the current status again is allowed.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending | Self::Processing)
                | (Self::Processing, Self::Processing | Self::Complete)
                | (Self::Complete, Self::Complete)
        )
    }
}

impl TryFrom<i64> for OrderStatus {
    type Error = OrderParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::New),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Complete),
            other => Err(OrderParseError::UnknownStatus(other)),
        }
    }
}

impl From<OrderStatus> for i64 {
    fn from(status: OrderStatus) -> Self {
        status as Self
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Pending => write!(f, "Pending"),
            Self::Processing => write!(f, "Processing"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// A customer order as it moves through the makeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Business key.
    #[serde(rename = "orderId")]
    pub order_id: OrderId,

    /// Current pipeline stage.
    #[serde(default)]
    pub status: OrderStatus,

    /// Every other field of the order, passed through untouched.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Order {
    /// Creates an order with an empty payload.
    #[must_use]
    pub fn new(order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            payload: Map::new(),
        }
    }

    /// Adds a payload field, replacing any previous value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    /// Decodes an order message as it arrives from the queue.
    ///
    /// Any inbound `status` is discarded: the intake pipeline decides the
    /// status, and a producer's stale or unknown value must not make an
    /// otherwise valid order undecodable.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the bytes are not a JSON object with a
    /// valid `orderId`.
    pub fn from_queue_message(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_slice(bytes)?;
        if let Some(object) = value.as_object_mut() {
            object.remove(STATUS_FIELD);
        }
        serde_json::from_value(value)
    }
}

/// Unvalidated body of a status update request.
///
/// Kept loose on purpose so that a missing id or an unknown status surfaces as a
/// malformed request from the service instead of a deserialization failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Raw order id as supplied by the caller.
    #[serde(rename = "orderId", default)]
    pub order_id: Option<String>,

    /// Raw status integer as supplied by the caller.
    #[serde(default)]
    pub status: Option<i64>,

    /// Any other supplied fields, written through to storage.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}
