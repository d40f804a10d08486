//! Request builder: local validation in front of the submission gateway.
//!
//! All checks are synchronous and side-effect free; a request that fails here
//! never reaches the network.

use crate::error::ValidationError;
use crate::models::BacktestRequest;
use chrono::NaiveDate;

pub const MIN_PROMPT_LEN: usize = 10;
/// Shorter windows produce statistically meaningless results.
pub const MIN_SPAN_DAYS: i64 = 60;
pub const MIN_INITIAL_CASH: f64 = 10_000.0;
pub const MAX_COMMISSION_PCT: f64 = 100.0;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Builder for a validated [`BacktestRequest`].
#[derive(Debug, Clone, Default)]
pub struct BacktestRequestBuilder {
    name: String,
    prompt: String,
    tickers: Vec<String>,
    initial_cash: f64,
    start_date: String,
    end_date: String,
    commission: f64,
}

impl BacktestRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Add a ticker symbol. Duplicates are dropped, order is preserved.
    pub fn ticker(mut self, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        if !self.tickers.contains(&symbol) {
            self.tickers.push(symbol);
        }
        self
    }

    pub fn tickers<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for symbol in symbols {
            self = self.ticker(symbol);
        }
        self
    }

    pub fn initial_cash(mut self, cash: f64) -> Self {
        self.initial_cash = cash;
        self
    }

    pub fn start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = date.into();
        self
    }

    pub fn end_date(mut self, date: impl Into<String>) -> Self {
        self.end_date = date.into();
        self
    }

    pub fn commission(mut self, pct: f64) -> Self {
        self.commission = pct;
        self
    }

    /// Run every constraint and emit an immutable request, or the first
    /// field-scoped failure.
    pub fn build(self) -> Result<BacktestRequest, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "Name must not be empty"));
        }

        if self.prompt.trim().len() < MIN_PROMPT_LEN {
            return Err(ValidationError::new(
                "prompt",
                format!("Prompt must be at least {} characters", MIN_PROMPT_LEN),
            ));
        }

        if self.tickers.is_empty() {
            return Err(ValidationError::new(
                "tickers",
                "Select at least one ticker",
            ));
        }

        let start = parse_date("start_date", &self.start_date)?;
        let end = parse_date("end_date", &self.end_date)?;

        if end <= start {
            return Err(ValidationError::new(
                "end_date",
                "End date must be after start date",
            ));
        }

        let span_days = (end - start).num_days();
        if span_days < MIN_SPAN_DAYS {
            return Err(ValidationError::new(
                "end_date",
                format!(
                    "Backtest period should be at least {} days for meaningful results",
                    MIN_SPAN_DAYS
                ),
            ));
        }

        if self.initial_cash < MIN_INITIAL_CASH {
            return Err(ValidationError::new(
                "initial_cash",
                format!(
                    "Initial cash should be at least {} for meaningful results",
                    MIN_INITIAL_CASH
                ),
            ));
        }

        if !(0.0..=MAX_COMMISSION_PCT).contains(&self.commission) {
            return Err(ValidationError::new(
                "commission",
                format!("Commission must be between 0 and {}", MAX_COMMISSION_PCT),
            ));
        }

        Ok(BacktestRequest {
            name: self.name,
            prompt: self.prompt,
            tickers: self.tickers,
            initial_cash: self.initial_cash,
            start_date: self.start_date,
            end_date: self.end_date,
            commission: self.commission,
        })
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| ValidationError::new(field, "Enter a valid date in YYYY-MM-DD format"))
}
