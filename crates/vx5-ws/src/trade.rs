//! Trading commands over the JRPC envelope.
//!
//! Each command sends `{id, op, args}` and expects exactly one
//! `{id, op, data, code, msg}` reply, validated by the JRPC result check.
//! Callers may pass their own request id for correlation in their logs; a
//! random one is generated otherwise.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;
use vx5_core::Vx5Error;

use crate::client::WsClient;
use crate::event::{Event, Period};
use crate::msg::{JrpcReq, ProcessDetail};

/// Build the JRPC envelope for a trading command.
///
/// The operation token comes from the event's table row; non-trading events
/// are rejected. `id` defaults to a random UUID (simple form, no hyphens).
pub fn jrpc_request(
    event: Event,
    id: Option<String>,
    args: Vec<HashMap<String, Value>>,
) -> Result<JrpcReq, Vx5Error> {
    if !matches!(
        event,
        Event::PlaceOrder
            | Event::PlaceBatchOrders
            | Event::CancelOrder
            | Event::CancelBatchOrders
            | Event::AmendOrder
            | Event::AmendBatchOrders
    ) {
        return Err(Vx5Error::Validation(format!("{event} is not a trading command")));
    }
    let op = event
        .channel(Period::None)
        .ok_or_else(|| Vx5Error::Validation(format!("{event} has no operation token")))?;

    Ok(JrpcReq {
        id: id.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        op,
        args,
    })
}

impl WsClient {
    /// Place a single order. Requires a logged-in connection.
    pub async fn place_order(
        &self,
        id: Option<String>,
        order: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::PlaceOrder, id, vec![order])?;
        self.jrpc(Event::PlaceOrder, req, timeout).await
    }

    /// Place a batch of orders in one command.
    pub async fn place_batch_orders(
        &self,
        id: Option<String>,
        orders: Vec<HashMap<String, Value>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::PlaceBatchOrders, id, orders)?;
        self.jrpc(Event::PlaceBatchOrders, req, timeout).await
    }

    /// Cancel a single order by `ordId` or `clOrdId`.
    pub async fn cancel_order(
        &self,
        id: Option<String>,
        order: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::CancelOrder, id, vec![order])?;
        self.jrpc(Event::CancelOrder, req, timeout).await
    }

    /// Cancel a batch of orders in one command.
    pub async fn cancel_batch_orders(
        &self,
        id: Option<String>,
        orders: Vec<HashMap<String, Value>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::CancelBatchOrders, id, orders)?;
        self.jrpc(Event::CancelBatchOrders, req, timeout).await
    }

    /// Amend the price or size of a resting order.
    pub async fn amend_order(
        &self,
        id: Option<String>,
        order: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::AmendOrder, id, vec![order])?;
        self.jrpc(Event::AmendOrder, req, timeout).await
    }

    /// Amend a batch of resting orders in one command.
    pub async fn amend_batch_orders(
        &self,
        id: Option<String>,
        orders: Vec<HashMap<String, Value>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let req = jrpc_request(Event::AmendBatchOrders, id, orders)?;
        self.jrpc(Event::AmendBatchOrders, req, timeout).await
    }
}
