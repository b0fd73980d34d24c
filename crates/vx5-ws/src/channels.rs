//! Typed channel subscription helpers.
//!
//! Everything here funnels into [`WsClient::channel_op`]: argument groups
//! are normalized against the event's canonical channel name (filled in when
//! absent, rejected when contradictory) and then handed to the generic
//! subscribe/unsubscribe path. The per-channel methods mirror the server's
//! channel catalogue so call sites never spell channel strings by hand.

use std::collections::HashMap;
use std::time::Duration;

use vx5_core::Vx5Error;

use crate::client::WsClient;
use crate::event::{Event, Period};
use crate::msg::ProcessDetail;

/// Direction of a channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAction {
    Subscribe,
    Unsubscribe,
}

/// Normalize argument groups for one channel family.
///
/// Groups without a `channel` key get the event's canonical name filled in;
/// groups naming a different channel are rejected before any I/O.
pub fn normalize_args(
    event: Event,
    period: Period,
    mut args: Vec<HashMap<String, String>>,
) -> Result<Vec<HashMap<String, String>>, Vx5Error> {
    let expected = event
        .channel(period)
        .ok_or_else(|| Vx5Error::Validation(format!("{event} is not a subscription channel")))?;

    for arg in &mut args {
        match arg.get("channel") {
            Some(channel) if *channel != expected => {
                return Err(Vx5Error::Validation(format!(
                    "channel {channel:?} does not belong to {event} (expected {expected:?})"
                )));
            }
            Some(_) => {}
            None => {
                arg.insert("channel".to_string(), expected.clone());
            }
        }
    }
    Ok(args)
}

fn inst_id_args(inst_ids: &[&str]) -> Vec<HashMap<String, String>> {
    inst_ids
        .iter()
        .map(|id| {
            let mut arg = HashMap::new();
            arg.insert("instId".to_string(), (*id).to_string());
            arg
        })
        .collect()
}

impl WsClient {
    /// Subscribe to or unsubscribe from one channel family.
    pub async fn channel_op(
        &self,
        action: SubAction,
        event: Event,
        period: Period,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let args = normalize_args(event, period, args)?;
        match action {
            SubAction::Subscribe => self.subscribe(args, timeout).await,
            SubAction::Unsubscribe => self.unsubscribe(args, timeout).await,
        }
    }

    /// Instrument catalogue updates for one or more instrument types.
    pub async fn instruments(
        &self,
        action: SubAction,
        inst_types: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let args = inst_types
            .iter()
            .map(|t| {
                let mut arg = HashMap::new();
                arg.insert("instType".to_string(), (*t).to_string());
                arg
            })
            .collect();
        self.channel_op(action, Event::Instruments, Period::None, args, timeout).await
    }

    /// System maintenance status.
    pub async fn status(
        &self,
        action: SubAction,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Status, Period::None, vec![HashMap::new()], timeout).await
    }

    /// Ticker stream for the given instruments.
    pub async fn tickers(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Tickers, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Open interest stream.
    pub async fn open_interest(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::OpenInterest, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Candlesticks at the given period.
    pub async fn candles(
        &self,
        action: SubAction,
        period: Period,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Candle, period, inst_id_args(inst_ids), timeout).await
    }

    /// Trade prints.
    pub async fn trades(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Trades, Period::None, inst_id_args(inst_ids), timeout).await
    }

    /// Estimated delivery/exercise price.
    pub async fn estimated_price(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(
            action,
            Event::EstimatedPrice,
            Period::None,
            inst_id_args(inst_ids),
            timeout,
        )
        .await
    }

    /// Mark price stream.
    pub async fn mark_price(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::MarkPrice, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Mark price candlesticks at the given period.
    pub async fn mark_price_candles(
        &self,
        action: SubAction,
        period: Period,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::MarkPriceCandle, period, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Price limit stream.
    pub async fn price_limit(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::PriceLimit, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Order book stream. `event` selects the book variant: [`Event::Books`],
    /// [`Event::Books5`], [`Event::BooksL2Tbt`], or [`Event::Books50L2Tbt`].
    pub async fn order_book(
        &self,
        action: SubAction,
        event: Event,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        if !matches!(
            event,
            Event::Books | Event::Books5 | Event::BooksL2Tbt | Event::Books50L2Tbt
        ) {
            return Err(Vx5Error::Validation(format!("{event} is not an order book channel")));
        }
        self.channel_op(action, event, Period::None, inst_id_args(inst_ids), timeout).await
    }

    /// Option market summary for an underlying.
    pub async fn opt_summary(
        &self,
        action: SubAction,
        underlyings: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let args = underlyings
            .iter()
            .map(|uly| {
                let mut arg = HashMap::new();
                arg.insert("uly".to_string(), (*uly).to_string());
                arg
            })
            .collect();
        self.channel_op(action, Event::OptSummary, Period::None, args, timeout).await
    }

    /// Funding rate stream.
    pub async fn funding_rate(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::FundingRate, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Index candlesticks at the given period.
    pub async fn index_candles(
        &self,
        action: SubAction,
        period: Period,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::IndexCandle, period, inst_id_args(inst_ids), timeout).await
    }

    /// Index ticker stream.
    pub async fn index_tickers(
        &self,
        action: SubAction,
        inst_ids: &[&str],
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::IndexTickers, Period::None, inst_id_args(inst_ids), timeout)
            .await
    }

    /// Account balance updates. Requires a logged-in connection.
    pub async fn account(
        &self,
        action: SubAction,
        ccy: Option<&str>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        let mut arg = HashMap::new();
        if let Some(ccy) = ccy {
            arg.insert("ccy".to_string(), ccy.to_string());
        }
        self.channel_op(action, Event::Account, Period::None, vec![arg], timeout).await
    }

    /// Position updates, filtered by the given argument groups
    /// (`instType` required per group, `instId`/`uly` optional).
    pub async fn positions(
        &self,
        action: SubAction,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Positions, Period::None, args, timeout).await
    }

    /// Order updates, filtered by the given argument groups.
    pub async fn orders(
        &self,
        action: SubAction,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::Orders, Period::None, args, timeout).await
    }

    /// Algo order updates, filtered by the given argument groups.
    pub async fn orders_algo(
        &self,
        action: SubAction,
        args: Vec<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(action, Event::OrdersAlgo, Period::None, args, timeout).await
    }

    /// Combined balance and position updates.
    pub async fn balance_and_position(
        &self,
        action: SubAction,
        timeout: Duration,
    ) -> Result<ProcessDetail, Vx5Error> {
        self.channel_op(
            action,
            Event::BalanceAndPosition,
            Period::None,
            vec![HashMap::new()],
            timeout,
        )
        .await
    }
}
