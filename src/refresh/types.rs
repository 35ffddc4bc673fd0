use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_TICK_PERIOD_MS: u64 = 60_000;
pub const DEFAULT_LOCAL_TIMER_PERIOD_MS: u64 = 1_000;
pub const DEFAULT_CHANGED_REVERT_MS: u64 = 2_000;
pub const DEFAULT_TRADING_START_MINUTE: u32 = 9 * 60 + 20;
pub const DEFAULT_TRADING_END_MINUTE: u32 = 15 * 60 + 20;
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
pub const MIN_TICK_PERIOD_MS: u64 = 100;
pub const MAX_TICK_PERIOD_MS: u64 = 3_600_000;
pub const MIN_LOCAL_TIMER_PERIOD_MS: u64 = 50;
pub const MAX_LOCAL_TIMER_PERIOD_MS: u64 = 60_000;
pub const MIN_CHANGED_REVERT_MS: u64 = 100;
pub const MAX_CHANGED_REVERT_MS: u64 = 10_000;
pub const MINUTES_PER_DAY: u32 = 24 * 60;

pub const MIN_CADENCE_TICKS: u32 = 1;
pub const MAX_CADENCE_TICKS: u32 = 1_440;
pub const DEFAULT_CADENCE_TICKS: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Visible)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TradingWindow {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            start_minute: DEFAULT_TRADING_START_MINUTE,
            end_minute: DEFAULT_TRADING_END_MINUTE,
        }
    }
}

impl TradingWindow {
    pub fn new(start_minute: u32, end_minute: u32) -> Result<Self, AppError> {
        if start_minute >= MINUTES_PER_DAY || end_minute >= MINUTES_PER_DAY {
            return Err(AppError::InvalidArgument(format!(
                "trading window minutes must be below {MINUTES_PER_DAY}"
            )));
        }
        if start_minute > end_minute {
            return Err(AppError::InvalidArgument(
                "trading window start must not be after its end".to_string(),
            ));
        }
        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn contains_minute(&self, minute_of_day: u32) -> bool {
        (self.start_minute..=self.end_minute).contains(&minute_of_day)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSettingsArgs {
    pub tick_period_ms: Option<u64>,
    pub local_timer_period_ms: Option<u64>,
    pub changed_revert_ms: Option<u64>,
    pub trading_start_minute: Option<u32>,
    pub trading_end_minute: Option<u32>,
    pub enforce_trading_window: Option<bool>,
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub tick_period_ms: u64,
    pub local_timer_period_ms: u64,
    pub changed_revert_ms: u64,
    pub trading_window: Option<TradingWindow>,
    pub api_base_url: String,
}

impl RefreshSettingsArgs {
    pub fn normalize(self) -> Result<RefreshConfig, AppError> {
        let tick_period_ms = self.tick_period_ms.unwrap_or(DEFAULT_TICK_PERIOD_MS);
        if !(MIN_TICK_PERIOD_MS..=MAX_TICK_PERIOD_MS).contains(&tick_period_ms) {
            return Err(AppError::InvalidArgument(format!(
                "tickPeriodMs must be between {MIN_TICK_PERIOD_MS} and {MAX_TICK_PERIOD_MS}"
            )));
        }

        let local_timer_period_ms = self
            .local_timer_period_ms
            .unwrap_or(DEFAULT_LOCAL_TIMER_PERIOD_MS);
        if !(MIN_LOCAL_TIMER_PERIOD_MS..=MAX_LOCAL_TIMER_PERIOD_MS).contains(&local_timer_period_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "localTimerPeriodMs must be between {MIN_LOCAL_TIMER_PERIOD_MS} and {MAX_LOCAL_TIMER_PERIOD_MS}"
            )));
        }

        let changed_revert_ms = self.changed_revert_ms.unwrap_or(DEFAULT_CHANGED_REVERT_MS);
        if !(MIN_CHANGED_REVERT_MS..=MAX_CHANGED_REVERT_MS).contains(&changed_revert_ms) {
            return Err(AppError::InvalidArgument(format!(
                "changedRevertMs must be between {MIN_CHANGED_REVERT_MS} and {MAX_CHANGED_REVERT_MS}"
            )));
        }

        let trading_window = if self.enforce_trading_window.unwrap_or(true) {
            Some(TradingWindow::new(
                self.trading_start_minute
                    .unwrap_or(DEFAULT_TRADING_START_MINUTE),
                self.trading_end_minute.unwrap_or(DEFAULT_TRADING_END_MINUTE),
            )?)
        } else {
            None
        };

        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "apiBaseUrl must be an http(s) URL".to_string(),
            ));
        }

        Ok(RefreshConfig {
            tick_period_ms,
            local_timer_period_ms,
            changed_revert_ms,
            trading_window,
            api_base_url,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClockStatusSnapshot {
    pub state: ClockState,
    pub tick: u64,
    pub session_active: bool,
    pub visibility: Visibility,
    pub held: bool,
    pub reason: Option<String>,
}

impl RefreshClockStatusSnapshot {
    pub fn paused(reason: Option<String>) -> Self {
        Self {
            state: ClockState::Paused,
            tick: 0,
            session_active: false,
            visibility: Visibility::Visible,
            held: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub user_id: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceMove {
    #[default]
    None,
    Up,
    Down,
}

impl PriceMove {
    pub fn between(previous: Option<f64>, next: f64) -> Self {
        match previous {
            Some(prev) if next > prev => Self::Up,
            Some(prev) if next < prev => Self::Down,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub last_price: f64,
    pub prior_close: Option<f64>,
    pub change_amount: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub open: f64,
}

pub type QuoteBatch = HashMap<String, QuoteSnapshot>;

// The quote service sends prices either as JSON numbers or as decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    pub fn to_f64(&self) -> Result<Option<f64>, AppError> {
        match self {
            Self::Number(value) => Ok(Some(*value)),
            Self::Text(text) if text.trim().is_empty() => Ok(None),
            Self::Text(text) => Ok(Some(text.trim().parse::<f64>()?)),
        }
    }
}

fn wire_value(value: &Option<WireNumber>) -> Result<Option<f64>, AppError> {
    match value {
        Some(number) => number.to_f64(),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct RealtimeWire {
    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<WireNumber>,
    #[serde(rename = "lastClose", default)]
    pub last_close: Option<WireNumber>,
    #[serde(default)]
    pub rise_amt: Option<WireNumber>,
    #[serde(default)]
    pub rise_per: Option<WireNumber>,
    #[serde(default)]
    pub volume: Option<WireNumber>,
    #[serde(default)]
    pub open: Option<WireNumber>,
}

impl TryFrom<RealtimeWire> for QuoteSnapshot {
    type Error = AppError;

    fn try_from(value: RealtimeWire) -> Result<Self, Self::Error> {
        let last_price = wire_value(&value.last_price)?.ok_or_else(|| {
            AppError::InvalidArgument("quote is missing lastPrice".to_string())
        })?;
        if !last_price.is_finite() {
            return Err(AppError::InvalidArgument(
                "quote price must be finite".to_string(),
            ));
        }

        Ok(Self {
            last_price,
            prior_close: wire_value(&value.last_close)?
                .filter(|close| close.is_finite() && *close != 0.0)
                .map(round_to_cents),
            change_amount: wire_value(&value.rise_amt)?.unwrap_or_default(),
            change_percent: wire_value(&value.rise_per)?.unwrap_or_default(),
            volume: wire_value(&value.volume)?.unwrap_or_default(),
            open: wire_value(&value.open)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RealtimeEnvelopeWire {
    pub success: bool,
    #[serde(default)]
    pub data: Option<HashMap<String, RealtimeWire>>,
    #[serde(default)]
    pub message: Option<String>,
}

pub fn parse_realtime_payload(payload: &mut [u8]) -> Result<QuoteBatch, AppError> {
    let envelope: RealtimeEnvelopeWire = simd_json::serde::from_slice(payload)?;
    if !envelope.success {
        return Err(AppError::Business(
            envelope
                .message
                .unwrap_or_else(|| "request failed".to_string()),
        ));
    }

    let mut batch = QuoteBatch::new();
    for (code, wire) in envelope.data.unwrap_or_default() {
        if wire_value(&wire.last_price)?.is_none() {
            continue;
        }
        batch.insert(code, wire.try_into()?);
    }
    Ok(batch)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferencePrices {
    pub build_high: Option<f64>,
    pub build_low: Option<f64>,
    pub avg_price: Option<f64>,
    pub target_price: Option<f64>,
    pub weekly_close_avg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedPercents {
    pub build_high: Option<f64>,
    pub build_low: Option<f64>,
    pub avg_price: Option<f64>,
    pub target_price: Option<f64>,
    pub weekly_close_avg: Option<f64>,
}

impl DerivedPercents {
    pub fn compute(last_price: f64, references: &ReferencePrices) -> Self {
        Self {
            build_high: percent_of(last_price, references.build_high),
            build_low: percent_of(last_price, references.build_low),
            avg_price: percent_of(last_price, references.avg_price),
            target_price: percent_of(last_price, references.target_price),
            weekly_close_avg: percent_of(last_price, references.weekly_close_avg),
        }
    }
}

pub fn percent_of(reference: f64, basis: Option<f64>) -> Option<f64> {
    let basis = basis.filter(|value| value.is_finite() && *value != 0.0)?;
    Some(round_to_cents(reference / basis * 100.0))
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchRow {
    pub code: String,
    pub name: String,
    pub last_price: Option<f64>,
    pub prior_close: Option<f64>,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub open: Option<f64>,
    pub references: ReferencePrices,
    pub derived: DerivedPercents,
    pub changed: PriceMove,
}

impl WatchRow {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_price(mut self, last_price: f64) -> Self {
        self.last_price = Some(last_price);
        self
    }

    pub fn with_references(mut self, references: ReferencePrices) -> Self {
        self.references = references;
        self
    }

    pub fn merged_with(&self, quote: &QuoteSnapshot) -> Self {
        Self {
            code: self.code.clone(),
            name: self.name.clone(),
            last_price: Some(quote.last_price),
            prior_close: quote.prior_close,
            change_amount: Some(quote.change_amount),
            change_percent: Some(quote.change_percent),
            volume: Some(quote.volume),
            open: Some(quote.open),
            references: self.references.clone(),
            derived: DerivedPercents::compute(quote.last_price, &self.references),
            changed: PriceMove::between(self.last_price, quote.last_price),
        }
    }
}
