//! Client-side market table: fetch lifecycle, text filter and row model.
//!
//! The state is owned by a single task. Fetches are started with
//! [`Dashboard::begin_fetch`] and completed with [`Dashboard::finish_fetch`];
//! while one is in flight every further trigger is dropped.

use chrono::{DateTime, Local};

use crate::market::MarketSnapshot;

pub const FETCH_ERROR: &str = "Failed to sync with market data.";
pub const PLACEHOLDER_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    Timer,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Mount => "mount",
            Trigger::Timer => "timer",
            Trigger::Manual => "manual",
        }
    }
}

/// Identifies one fetch. A completion is applied only if its ticket is the one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct Dashboard {
    records: Vec<MarketSnapshot>,
    filter_text: String,
    is_loading: bool,
    last_error: Option<String>,
    in_flight: Option<Ticket>,
    next_ticket: u64,
    last_synced: Option<DateTime<Local>>,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[MarketSnapshot] {
        &self.records
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_synced(&self) -> Option<DateTime<Local>> {
        self.last_synced
    }

    /// Idle -> Fetching. Returns `None` (and changes nothing) if a fetch is already running.
    pub fn begin_fetch(&mut self, trigger: Trigger) -> Option<Ticket> {
        if self.in_flight.is_some() {
            log::debug!("watch.poll_dropped trigger={} reason=in_flight", trigger.as_str());
            return None;
        }
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.in_flight = Some(ticket);
        self.is_loading = true;
        log::debug!("watch.poll trigger={} ticket={}", trigger.as_str(), ticket.0);
        Some(ticket)
    }

    /// Fetching -> Success | Failed. Returns false if `ticket` is not the fetch in flight.
    pub fn finish_fetch<E: std::fmt::Display>(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<MarketSnapshot>, E>,
    ) -> bool {
        if self.in_flight != Some(ticket) {
            log::warn!("watch.stale_result ticket={}", ticket.0);
            return false;
        }
        self.in_flight = None;
        self.is_loading = false;

        match result {
            Ok(records) => {
                log::info!("watch.synced count={}", records.len());
                self.records = records;
                self.last_error = None;
                self.last_synced = Some(Local::now());
            }
            Err(e) => {
                // Stale records stay visible under the banner.
                log::warn!("watch.sync_failed error={}", e);
                self.last_error = Some(FETCH_ERROR.to_string());
            }
        }
        true
    }

    pub fn set_filter(&mut self, text: impl Into<String>) {
        self.filter_text = text.into();
    }

    /// Records whose name or symbol contains the filter text, ignoring case.
    pub fn visible(&self) -> Vec<&MarketSnapshot> {
        let needle = self.filter_text.to_lowercase();
        self.records
            .iter()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle) || r.symbol.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn refresh_label(&self) -> &'static str {
        if self.is_loading {
            "Syncing..."
        } else {
            "Refresh"
        }
    }

    /// Table body, top to bottom.
    pub fn rows(&self) -> Vec<Row<'_>> {
        let visible = self.visible();
        let empty = visible.is_empty();
        let mut rows: Vec<Row<'_>> = visible.into_iter().map(|r| Row::Coin(CoinRow::from(r))).collect();

        if self.is_loading && self.records.is_empty() {
            rows.extend((0..PLACEHOLDER_ROWS).map(|_| Row::Placeholder));
        }
        if !self.is_loading && empty {
            rows.push(Row::NoResults {
                filter: &self.filter_text,
            });
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Row<'a> {
    Placeholder,
    NoResults { filter: &'a str },
    Coin(CoinRow<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinRow<'a> {
    pub icon: &'a str,
    pub name: &'a str,
    pub symbol: &'a str,
    pub price: String,
    pub change: Change,
}

impl<'a> From<&'a MarketSnapshot> for CoinRow<'a> {
    fn from(r: &'a MarketSnapshot) -> Self {
        Self {
            icon: &r.image,
            name: &r.name,
            symbol: &r.symbol,
            price: format_price(r.price),
            change: Change::from_percent(r.change_24h),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Absolute percentage, two decimals, with `%`.
    Known { direction: Direction, text: String },
    /// Provider did not report a 24h change.
    Unknown,
}

impl Change {
    pub fn from_percent(pct: Option<f64>) -> Self {
        match pct {
            Some(p) if p.is_finite() => Change::Known {
                direction: if p >= 0.0 {
                    Direction::Up
                } else {
                    Direction::Down
                },
                text: format!("{:.2}%", p.abs()),
            },
            _ => Change::Unknown,
        }
    }
}

/// Thousands-separated USD amount with two or three fraction digits.
pub fn format_price(price: f64) -> String {
    let mut fixed = format!("{:.3}", price.abs());
    if fixed.ends_with('0') {
        fixed.pop();
    }
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits = int_part.as_bytes();
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, d) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*d as char);
    }

    let sign = if price < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}.{frac_part}")
}
