//! Backtest backend REST client.
//!
//! One client struct owning a `reqwest::Client`, one typed method per
//! endpoint, and a single normalization path for error responses. This layer
//! does not retry: the submission gateway contract is one request, one
//! answer. Bounded retry for transient failures lives in the poller and the
//! hydrator, which own the backoff policy.

use crate::config::Config;
use crate::error::{error_from_response, ApiError};
use crate::models::{
    AuthResponse, BacktestRequest, BacktestResults, BacktestStatus, BenchmarkReturns,
    DatabaseInfo, DeleteResponse, LoginCredentials, RegisterData, ReportFormat, ReturnData,
    TickerListResponse, Trade, UserDetails,
};
use crate::hydrator::ResultFetcher;
use crate::poller::StatusSource;
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("FlashtestClient/", env!("CARGO_PKG_VERSION"));

pub struct BacktestClient {
    client: Client,
    base_url: String,
    session: Arc<Session>,
}

impl BacktestClient {
    pub fn new(config: &Config, session: Arc<Session>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    // =========================================================================
    // BACKTEST LIFECYCLE
    // =========================================================================

    /// Submit a validated backtest. Returns the server-assigned identifier
    /// and initial state (normally pending or running).
    pub async fn submit(&self, request: &BacktestRequest) -> Result<BacktestStatus, ApiError> {
        let status: BacktestStatus = self
            .execute(self.request(Method::POST, "/backtest/run").json(request))
            .await?;

        info!(
            backtest_id = %status.backtest_id,
            state = status.state.as_str(),
            "Submitted backtest {:?}",
            request.name
        );
        Ok(status)
    }

    /// Fetch the current status for one backtest.
    pub async fn status(&self, backtest_id: &str) -> Result<BacktestStatus, ApiError> {
        let status: BacktestStatus = self
            .execute(self.request(Method::GET, &format!("/backtest/status/{}", backtest_id)))
            .await?;

        debug!(
            backtest_id,
            state = status.state.as_str(),
            "Fetched backtest status"
        );
        Ok(status)
    }

    /// Fetch the results payload for a completed backtest.
    pub async fn results(&self, backtest_id: &str) -> Result<BacktestResults, ApiError> {
        self.execute(self.request(Method::GET, &format!("/backtest/results/{}", backtest_id)))
            .await
    }

    /// Fetch the closed-trade list for a completed backtest.
    pub async fn trades(&self, backtest_id: &str) -> Result<Vec<Trade>, ApiError> {
        let trades: Vec<Trade> = self
            .execute(self.request(Method::GET, &format!("/backtest/trades/{}", backtest_id)))
            .await?;

        debug!(backtest_id, count = trades.len(), "Fetched trades");
        Ok(trades)
    }

    /// Fetch the per-bucket strategy/benchmark returns series.
    pub async fn returns(&self, backtest_id: &str) -> Result<Vec<ReturnData>, ApiError> {
        let returns: Vec<ReturnData> = self
            .execute(self.request(Method::GET, &format!("/backtest/returns/{}", backtest_id)))
            .await?;

        debug!(backtest_id, count = returns.len(), "Fetched returns series");
        Ok(returns)
    }

    /// List all backtests belonging to the current user.
    pub async fn list_backtests(&self) -> Result<Vec<BacktestStatus>, ApiError> {
        self.execute(self.request(Method::GET, "/backtest/user/backtests"))
            .await
    }

    /// Delete a backtest. Returns the server's confirmation message.
    pub async fn delete(&self, backtest_id: &str) -> Result<DeleteResponse, ApiError> {
        let confirmation: DeleteResponse = self
            .execute(self.request(Method::DELETE, &format!("/backtest/{}", backtest_id)))
            .await?;

        info!(backtest_id, "Deleted backtest");
        Ok(confirmation)
    }

    /// Download a rendered report as raw bytes.
    pub async fn download_report(
        &self,
        backtest_id: &str,
        format: ReportFormat,
    ) -> Result<Vec<u8>, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, &format!("/backtest/download/{}", backtest_id))
                    .query(&[("format", format.as_str())]),
            )
            .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        info!(
            backtest_id,
            format = format.as_str(),
            size = bytes.len(),
            "Downloaded report"
        );
        Ok(bytes.to_vec())
    }

    /// URL of a downloadable report, for handing off to other tools.
    pub fn report_url(&self, backtest_id: &str, format: ReportFormat) -> String {
        format!(
            "{}/backtest/download/{}?format={}",
            self.base_url,
            backtest_id,
            format.as_str()
        )
    }

    // =========================================================================
    // DATABASE
    // =========================================================================

    /// Tickers available for backtesting.
    pub async fn tickers(&self) -> Result<Vec<String>, ApiError> {
        let response: TickerListResponse = self
            .execute(self.request(Method::GET, "/database/tickers"))
            .await?;
        Ok(response.tickers)
    }

    /// Date coverage of the backend's price database.
    pub async fn database_info(&self) -> Result<DatabaseInfo, ApiError> {
        self.execute(self.request(Method::GET, "/database/info"))
            .await
    }

    /// Benchmark returns over a date range.
    pub async fn benchmark_returns(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<BenchmarkReturns, ApiError> {
        self.execute(self.request(
            Method::GET,
            &format!("/database/benchmark-returns/{}/{}", start_date, end_date),
        ))
        .await
    }

    // =========================================================================
    // AUTH
    // =========================================================================

    /// Exchange credentials for a bearer token and install it in the session.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        let auth: AuthResponse = self
            .execute(
                self.request(Method::POST, "/api/auth/token")
                    .form(credentials),
            )
            .await?;

        if let Err(e) = self.session.set_token(&auth.access_token) {
            warn!("Logged in but failed to persist token: {:#}", e);
        }
        info!("Logged in");
        Ok(auth)
    }

    /// Register a new account. The backend issues a token immediately.
    pub async fn register(&self, data: &RegisterData) -> Result<AuthResponse, ApiError> {
        let auth: AuthResponse = self
            .execute(self.request(Method::POST, "/api/auth/register").json(data))
            .await?;

        if let Err(e) = self.session.set_token(&auth.access_token) {
            warn!("Registered but failed to persist token: {:#}", e);
        }
        info!("Registered user {:?}", data.username);
        Ok(auth)
    }

    /// Details of the currently authenticated user.
    pub async fn me(&self) -> Result<UserDetails, ApiError> {
        self.execute(self.request(Method::GET, "/api/auth/me"))
            .await
    }

    // =========================================================================
    // PLUMBING
    // =========================================================================

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Send a request and normalize non-2xx responses.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Send a request and decode the JSON body through its schema.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StatusSource for BacktestClient {
    async fn fetch_status(&self, backtest_id: &str) -> Result<BacktestStatus, ApiError> {
        self.status(backtest_id).await
    }
}

#[async_trait]
impl ResultFetcher for BacktestClient {
    async fn fetch_results(&self, backtest_id: &str) -> Result<BacktestResults, ApiError> {
        self.results(backtest_id).await
    }

    async fn fetch_trades(&self, backtest_id: &str) -> Result<Vec<Trade>, ApiError> {
        self.trades(backtest_id).await
    }

    async fn fetch_returns(&self, backtest_id: &str) -> Result<Vec<ReturnData>, ApiError> {
        self.returns(backtest_id).await
    }
}
