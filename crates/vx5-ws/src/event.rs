//! Event taxonomy — the bidirectional map between abstract event ids and
//! wire channel names.
//!
//! Every [`Event`] maps to exactly one `(label, channel-pattern)` row in
//! [`EVENT_TABLE`]. Candle-style channels carry a trailing [`Period`]
//! suffix on the wire (`candle1m`, `candle1Y`, …), so one table row covers
//! the whole family: resolution appends the period, identification strips a
//! period-shaped tail and retries the lookup.

use std::fmt;

/// Abstract event identifier.
///
/// Covers control events (ping/login/error), every subscribable channel,
/// the JRPC trading commands, and the two unsolicited push classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Unknown,
    Error,
    Ping,
    Login,

    // Public channels
    Instruments,
    Status,
    Tickers,
    OpenInterest,
    Candle,
    Trades,
    EstimatedPrice,
    MarkPrice,
    MarkPriceCandle,
    PriceLimit,
    Books,
    Books5,
    BooksL2Tbt,
    Books50L2Tbt,
    OptSummary,
    FundingRate,
    IndexCandle,
    IndexTickers,

    // Private channels
    Account,
    Positions,
    Orders,
    OrdersAlgo,
    BalanceAndPosition,

    // JRPC trading commands
    PlaceOrder,
    PlaceBatchOrders,
    CancelOrder,
    CancelBatchOrders,
    AmendOrder,
    AmendBatchOrders,

    // Unsolicited push classes (no channel of their own)
    BookedData,
    DepthData,
}

/// `(event, label, channel-pattern)` rows.
///
/// Channel-pattern `""` marks events with no wire channel (control events
/// and the push classes). Period-qualified channels store only the prefix.
pub const EVENT_TABLE: &[(Event, &str, &str)] = &[
    (Event::Unknown, "unknown", ""),
    (Event::Error, "error", ""),
    (Event::Ping, "ping", ""),
    (Event::Login, "login", ""),
    // Public channels
    (Event::Instruments, "instruments", "instruments"),
    (Event::Status, "status", "status"),
    (Event::Tickers, "tickers", "tickers"),
    (Event::OpenInterest, "open interest", "open-interest"),
    (Event::Candle, "candlesticks", "candle"),
    (Event::Trades, "trades", "trades"),
    (Event::EstimatedPrice, "estimated delivery price", "estimated-price"),
    (Event::MarkPrice, "mark price", "mark-price"),
    (Event::MarkPriceCandle, "mark price candlesticks", "mark-price-candle"),
    (Event::PriceLimit, "price limit", "price-limit"),
    (Event::Books, "order book", "books"),
    (Event::Books5, "order book 5", "books5"),
    (Event::BooksL2Tbt, "order book l2 tbt", "books-l2-tbt"),
    (Event::Books50L2Tbt, "order book 50 l2 tbt", "books50-l2-tbt"),
    (Event::OptSummary, "option summary", "opt-summary"),
    (Event::FundingRate, "funding rate", "funding-rate"),
    (Event::IndexCandle, "index candlesticks", "index-candle"),
    (Event::IndexTickers, "index tickers", "index-tickers"),
    // Private channels
    (Event::Account, "account", "account"),
    (Event::Positions, "positions", "positions"),
    (Event::Orders, "orders", "orders"),
    (Event::OrdersAlgo, "algo orders", "orders-algo"),
    (Event::BalanceAndPosition, "balance and position", "balance_and_position"),
    // JRPC trading commands
    (Event::PlaceOrder, "place order", "order"),
    (Event::PlaceBatchOrders, "place batch orders", "batch-orders"),
    (Event::CancelOrder, "cancel order", "cancel-order"),
    (Event::CancelBatchOrders, "cancel batch orders", "batch-cancel-orders"),
    (Event::AmendOrder, "amend order", "amend-order"),
    (Event::AmendBatchOrders, "amend batch orders", "batch-amend-orders"),
    // Push classes
    (Event::BookedData, "channel push", ""),
    (Event::DepthData, "depth push", ""),
];

impl Event {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        EVENT_TABLE
            .iter()
            .find(|(e, _, _)| e == self)
            .map(|(_, label, _)| *label)
            .unwrap_or("")
    }

    /// Resolve this event to its wire channel name.
    ///
    /// Period-qualified channels get the period suffix appended; events
    /// without a wire channel resolve to `None`.
    pub fn channel(&self, period: Period) -> Option<String> {
        let pattern = EVENT_TABLE
            .iter()
            .find(|(e, _, _)| e == self)
            .map(|(_, _, ch)| *ch)?;

        if pattern.is_empty() {
            return None;
        }
        Some(format!("{}{}", pattern, period.as_str()))
    }

    /// Identify the event for a wire channel name.
    ///
    /// First attempts an exact match against the table; if none matches,
    /// strips a trailing period-shaped suffix and retries, so one `candle`
    /// row serves `candle1m`, `candle30m`, `candle1Y`, …
    /// Returns [`Event::Unknown`] if nothing matches.
    pub fn from_channel(name: &str) -> Event {
        if name.is_empty() {
            return Event::Unknown;
        }

        if let Some(evt) = lookup_exact(name) {
            return evt;
        }

        // A period suffix is 2 or 3 chars: a non-zero digit, an optional
        // second digit, and one trailing word character.
        for stripped in strip_period_suffix(name) {
            if let Some(evt) = lookup_exact(stripped) {
                return evt;
            }
        }

        Event::Unknown
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn lookup_exact(name: &str) -> Option<Event> {
    EVENT_TABLE
        .iter()
        .find(|(_, _, ch)| !ch.is_empty() && *ch == name)
        .map(|(e, _, _)| *e)
}

/// Candidate prefixes after stripping a period-like suffix, shortest suffix
/// first.
fn strip_period_suffix(name: &str) -> impl Iterator<Item = &str> {
    let b = name.as_bytes();
    let n = b.len();
    let is_word = |c: u8| c.is_ascii_alphanumeric() || c == b'_';

    let two = (n >= 3 && b[n - 2].is_ascii_digit() && b[n - 2] != b'0' && is_word(b[n - 1]))
        .then(|| &name[..n - 2]);
    let three = (n >= 4
        && b[n - 3].is_ascii_digit()
        && b[n - 3] != b'0'
        && b[n - 2].is_ascii_digit()
        && is_word(b[n - 1]))
    .then(|| &name[..n - 3]);

    two.into_iter().chain(three)
}

/// Duration code suffixed onto period-qualified channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Period {
    Year1,
    Mon6,
    Mon3,
    Mon1,
    Week1,
    Day5,
    Day3,
    Day2,
    Day1,
    Hour12,
    Hour6,
    Hour4,
    Hour2,
    Hour1,
    Min30,
    Min15,
    Min5,
    Min3,
    Min1,
    #[default]
    None,
}

impl Period {
    /// Wire suffix for this period (`""` for [`Period::None`]).
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Year1 => "1Y",
            Period::Mon6 => "6M",
            Period::Mon3 => "3M",
            Period::Mon1 => "1M",
            Period::Week1 => "1W",
            Period::Day5 => "5D",
            Period::Day3 => "3D",
            Period::Day2 => "2D",
            Period::Day1 => "1D",
            Period::Hour12 => "12H",
            Period::Hour6 => "6H",
            Period::Hour4 => "4H",
            Period::Hour2 => "2H",
            Period::Hour1 => "1H",
            Period::Min30 => "30m",
            Period::Min15 => "15m",
            Period::Min5 => "5m",
            Period::Min3 => "3m",
            Period::Min1 => "1m",
            Period::None => "",
        }
    }

    /// Every period code, [`Period::None`] included.
    pub const ALL: [Period; 20] = [
        Period::Year1,
        Period::Mon6,
        Period::Mon3,
        Period::Mon1,
        Period::Week1,
        Period::Day5,
        Period::Day3,
        Period::Day2,
        Period::Day1,
        Period::Hour12,
        Period::Hour6,
        Period::Hour4,
        Period::Hour2,
        Period::Hour1,
        Period::Min30,
        Period::Min15,
        Period::Min5,
        Period::Min3,
        Period::Min1,
        Period::None,
    ];
}
