//! Wire schemas for the backtest backend.
//!
//! Every payload crossing the network boundary is deserialized through an
//! explicit schema here so a malformed response fails fast as a decode error
//! instead of propagating missing fields downstream.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// BACKTEST REQUEST
// =============================================================================

/// A validated backtest submission. Immutable once built; construct through
/// [`crate::request::BacktestRequestBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    /// Display name for the run.
    pub name: String,
    /// Natural-language strategy description sent to the backend.
    pub prompt: String,
    /// Ticker symbols, de-duplicated, in submission order.
    pub tickers: Vec<String>,
    /// Starting portfolio capital.
    pub initial_cash: f64,
    /// Inclusive start date, `YYYY-MM-DD`.
    pub start_date: String,
    /// Inclusive end date, `YYYY-MM-DD`.
    pub end_date: String,
    /// Commission per trade, percent (0-100).
    pub commission: f64,
}

// =============================================================================
// BACKTEST STATUS
// =============================================================================

/// Lifecycle state of a backtest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BacktestState {
    pub fn as_str(&self) -> &str {
        match self {
            BacktestState::Pending => "pending",
            BacktestState::Running => "running",
            BacktestState::Completed => "completed",
            BacktestState::Failed => "failed",
        }
    }

    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BacktestState::Completed | BacktestState::Failed)
    }
}

/// Status snapshot for one backtest job. Only ever mutated by re-fetching
/// from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestStatus {
    /// Opaque server-assigned identifier.
    pub backtest_id: String,
    #[serde(rename = "status")]
    pub state: BacktestState,
    /// Human-readable status message from the backend.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Backend-reported completion fraction (0-100), when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

// =============================================================================
// BACKTEST RESULTS
// =============================================================================

/// Performance metrics. The named fields are the core set every backtest
/// reports; anything else the backend computes lands in `additional`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    #[serde(default)]
    pub total_return: f64,
    #[serde(default)]
    pub annual_return: f64,
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub sharpe: f64,
    #[serde(default)]
    pub sortino: f64,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default)]
    pub beta: f64,
    #[serde(default)]
    pub alpha: f64,
    /// Open-ended extra metrics, keyed by name. BTreeMap keeps CSV column
    /// order stable across runs.
    #[serde(flatten)]
    pub additional: BTreeMap<String, f64>,
}

/// Canonical display order of the core metrics, shared by the comparison
/// table and CSV export.
pub const CORE_METRICS: [(&str, &str); 9] = [
    ("total_return", "Total Return"),
    ("annual_return", "Annual Return"),
    ("volatility", "Volatility"),
    ("sharpe", "Sharpe"),
    ("sortino", "Sortino"),
    ("max_drawdown", "Max Drawdown"),
    ("win_rate", "Win Rate"),
    ("beta", "Beta"),
    ("alpha", "Alpha"),
];

impl BacktestMetrics {
    /// Look up a metric by wire name, checking core fields first.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "total_return" => Some(self.total_return),
            "annual_return" => Some(self.annual_return),
            "volatility" => Some(self.volatility),
            "sharpe" => Some(self.sharpe),
            "sortino" => Some(self.sortino),
            "max_drawdown" => Some(self.max_drawdown),
            "win_rate" => Some(self.win_rate),
            "beta" => Some(self.beta),
            "alpha" => Some(self.alpha),
            other => self.additional.get(other).copied(),
        }
    }
}

/// Terminal artifact of a completed backtest. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub backtest_id: String,
    pub metrics: BacktestMetrics,
    /// Free-text analysis of the run.
    #[serde(default)]
    pub insights: String,
    /// Free-text improvement suggestions.
    #[serde(default)]
    pub improvements: String,
    /// Generated strategy source code.
    #[serde(default)]
    pub strategy_code: String,
    /// Date range the backtest was requested for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

// =============================================================================
// TRADES & RETURNS
// =============================================================================

/// Direction of a closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Long,
    Short,
}

/// One row per closed position, sourced entirely from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub ticker: String,
    pub trade_type: TradeType,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub return_pct: f64,
}

/// Strategy vs benchmark return for one time bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnData {
    pub date: NaiveDate,
    pub strategy_return: f64,
    pub benchmark_return: f64,
}

// =============================================================================
// DATABASE ENDPOINTS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TickerListResponse {
    pub tickers: Vec<String>,
}

/// Coverage of the backend's price database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInfo {
    #[serde(default)]
    pub database_path: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkReturns {
    pub returns: BenchmarkSeries,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkSeries {
    pub dates: Vec<String>,
    pub values: Vec<f64>,
}

/// Confirmation payload for `DELETE /backtest/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Report download format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Csv,
    Html,
}

impl ReportFormat {
    pub fn as_str(&self) -> &str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Html => "html",
        }
    }
}

// =============================================================================
// AUTH
// =============================================================================

/// Form-encoded credentials for `POST /api/auth/token`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterData {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub username: String,
    pub is_active: bool,
    pub created_at: String,
}

impl UserDetails {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_snake_case() {
        let json = "\"running\"";
        let state: BacktestState = serde_json::from_str(json).unwrap();
        assert_eq!(state, BacktestState::Running);
        assert_eq!(serde_json::to_string(&state).unwrap(), json);
    }

    #[test]
    fn terminal_states() {
        assert!(!BacktestState::Pending.is_terminal());
        assert!(!BacktestState::Running.is_terminal());
        assert!(BacktestState::Completed.is_terminal());
        assert!(BacktestState::Failed.is_terminal());
    }

    #[test]
    fn status_decodes_minimal_payload() {
        let json = r#"{"backtest_id":"bt_1","status":"pending"}"#;
        let status: BacktestStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.backtest_id, "bt_1");
        assert_eq!(status.state, BacktestState::Pending);
        assert!(status.message.is_empty());
        assert!(status.created_at.is_none());
        assert!(status.progress.is_none());
    }

    #[test]
    fn status_rejects_unknown_state() {
        let json = r#"{"backtest_id":"bt_1","status":"exploded"}"#;
        assert!(serde_json::from_str::<BacktestStatus>(json).is_err());
    }

    #[test]
    fn metrics_flatten_additional_fields() {
        let json = r#"{
            "total_return": 42.5,
            "sharpe": 1.3,
            "calmar": 0.8,
            "information_ratio": 0.55
        }"#;
        let metrics: BacktestMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(metrics.total_return, 42.5);
        assert_eq!(metrics.sharpe, 1.3);
        assert_eq!(metrics.get("calmar"), Some(0.8));
        assert_eq!(metrics.get("information_ratio"), Some(0.55));
        assert_eq!(metrics.get("nonexistent"), None);
    }

    #[test]
    fn trade_decodes_backend_row() {
        let json = r#"{
            "id": 7,
            "ticker": "AAPL",
            "trade_type": "long",
            "entry_date": "2021-03-01",
            "exit_date": "2021-03-15",
            "entry_price": 120.5,
            "exit_price": 131.2,
            "pnl": 1070.0,
            "return_pct": 8.88
        }"#;
        let trade: Trade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.trade_type, TradeType::Long);
        assert_eq!(trade.entry_date.to_string(), "2021-03-01");
    }
}
