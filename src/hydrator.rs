//! Result hydration for a completed backtest.
//!
//! Results, trades, and the returns series are three independent sub-fetches
//! with independent failure handling: a dead trades endpoint must not block
//! the metrics view. Each section retries transport errors with the same
//! bounded backoff policy the poller uses and reports its own error; there
//! is deliberately no aggregate failure.

use crate::error::ApiError;
use crate::models::{BacktestResults, ReturnData, Trade};
use crate::poller::{PollPolicy, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where result payloads come from. Implemented by
/// [`crate::client::BacktestClient`]; tests script their own.
#[async_trait]
pub trait ResultFetcher: Send + Sync {
    async fn fetch_results(&self, backtest_id: &str) -> Result<BacktestResults, ApiError>;
    async fn fetch_trades(&self, backtest_id: &str) -> Result<Vec<Trade>, ApiError>;
    async fn fetch_returns(&self, backtest_id: &str) -> Result<Vec<ReturnData>, ApiError>;
}

/// Per-section outcome of one hydration pass.
#[derive(Debug)]
pub struct HydratedResults {
    pub backtest_id: String,
    pub results: Result<BacktestResults, ApiError>,
    pub trades: Result<Vec<Trade>, ApiError>,
    pub returns: Result<Vec<ReturnData>, ApiError>,
}

impl HydratedResults {
    /// True when every section arrived.
    pub fn is_complete(&self) -> bool {
        self.results.is_ok() && self.trades.is_ok() && self.returns.is_ok()
    }

    /// Failed sections by name, for display.
    pub fn section_errors(&self) -> Vec<(&'static str, &ApiError)> {
        let mut errors = Vec::new();
        if let Err(e) = &self.results {
            errors.push(("results", e));
        }
        if let Err(e) = &self.trades {
            errors.push(("trades", e));
        }
        if let Err(e) = &self.returns {
            errors.push(("returns", e));
        }
        errors
    }
}

pub struct ResultHydrator<F: ?Sized, S = TokioSleeper> {
    fetcher: Arc<F>,
    policy: PollPolicy,
    sleeper: S,
}

impl<F: ResultFetcher + ?Sized> ResultHydrator<F> {
    pub fn new(fetcher: Arc<F>, policy: PollPolicy) -> Self {
        Self::with_sleeper(fetcher, policy, TokioSleeper)
    }
}

impl<F: ResultFetcher + ?Sized, S: Sleeper> ResultHydrator<F, S> {
    pub fn with_sleeper(fetcher: Arc<F>, policy: PollPolicy, sleeper: S) -> Self {
        Self {
            fetcher,
            policy,
            sleeper,
        }
    }

    /// Fetch all three sections concurrently. Always returns all three
    /// outcomes; the caller renders what arrived and flags what did not.
    pub async fn hydrate(&self, backtest_id: &str) -> HydratedResults {
        let (results, trades, returns) = tokio::join!(
            self.with_retry("results", || self.fetcher.fetch_results(backtest_id)),
            self.with_retry("trades", || self.fetcher.fetch_trades(backtest_id)),
            self.with_retry("returns", || self.fetcher.fetch_returns(backtest_id)),
        );

        let hydrated = HydratedResults {
            backtest_id: backtest_id.to_string(),
            results,
            trades,
            returns,
        };

        for (section, error) in hydrated.section_errors() {
            warn!(backtest_id, section, "Hydration section failed: {}", error);
        }
        hydrated
    }

    async fn with_retry<T, Fut, Op>(&self, section: &'static str, op: Op) -> Result<T, ApiError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        fetch_with_retry(&self.policy, &self.sleeper, section, op).await
    }
}

/// Retry transport errors with the shared backoff policy; everything else
/// (server rejection, unauthorized, decode) fails immediately. Used by the
/// hydrator sections and the comparison fan-out.
pub(crate) async fn fetch_with_retry<T, Fut, Op>(
    policy: &PollPolicy,
    sleeper: &impl Sleeper,
    label: &str,
    mut op: Op,
) -> Result<T, ApiError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        match op().await {
            Ok(value) => {
                debug!(label, "Fetch succeeded");
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempts < policy.retry_limit => {
                attempts += 1;
                warn!(
                    label,
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Retrying fetch: {}",
                    e
                );
                sleeper.sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacktestMetrics, TradeType};
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    type Scripted<T> = Mutex<VecDeque<Result<T, ApiError>>>;

    #[derive(Default)]
    struct ScriptedFetcher {
        results: Scripted<BacktestResults>,
        trades: Scripted<Vec<Trade>>,
        returns: Scripted<Vec<ReturnData>>,
    }

    impl ScriptedFetcher {
        fn push_results(&self, r: Result<BacktestResults, ApiError>) {
            self.results.lock().push_back(r);
        }
        fn push_trades(&self, r: Result<Vec<Trade>, ApiError>) {
            self.trades.lock().push_back(r);
        }
        fn push_returns(&self, r: Result<Vec<ReturnData>, ApiError>) {
            self.returns.lock().push_back(r);
        }
    }

    #[async_trait]
    impl ResultFetcher for ScriptedFetcher {
        async fn fetch_results(&self, _id: &str) -> Result<BacktestResults, ApiError> {
            self.results.lock().pop_front().expect("results script empty")
        }
        async fn fetch_trades(&self, _id: &str) -> Result<Vec<Trade>, ApiError> {
            self.trades.lock().pop_front().expect("trades script empty")
        }
        async fn fetch_returns(&self, _id: &str) -> Result<Vec<ReturnData>, ApiError> {
            self.returns.lock().pop_front().expect("returns script empty")
        }
    }

    #[derive(Default)]
    struct InstantSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().push(duration);
        }
    }

    fn sample_results() -> BacktestResults {
        BacktestResults {
            backtest_id: "bt_1".to_string(),
            metrics: BacktestMetrics {
                total_return: 12.0,
                sharpe: 1.1,
                ..Default::default()
            },
            insights: "Solid momentum capture".to_string(),
            improvements: String::new(),
            strategy_code: String::new(),
            start_date: Some("2020-01-01".to_string()),
            end_date: Some("2021-01-01".to_string()),
        }
    }

    fn sample_trade() -> Trade {
        Trade {
            id: 1,
            ticker: "AAPL".to_string(),
            trade_type: TradeType::Long,
            entry_date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            exit_date: NaiveDate::from_ymd_opt(2020, 3, 20).unwrap(),
            entry_price: 100.0,
            exit_price: 110.0,
            pnl: 1000.0,
            return_pct: 10.0,
        }
    }

    fn server_error(detail: &str) -> ApiError {
        ApiError::Server {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.to_string(),
        }
    }

    fn hydrator(fetcher: Arc<ScriptedFetcher>) -> ResultHydrator<ScriptedFetcher, InstantSleeper> {
        ResultHydrator::with_sleeper(fetcher, PollPolicy::default(), InstantSleeper::default())
    }

    #[tokio::test]
    async fn all_sections_hydrate() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_results(Ok(sample_results()));
        fetcher.push_trades(Ok(vec![sample_trade()]));
        fetcher.push_returns(Ok(vec![]));

        let hydrated = hydrator(fetcher).hydrate("bt_1").await;
        assert!(hydrated.is_complete());
        assert!(hydrated.section_errors().is_empty());
        assert_eq!(hydrated.trades.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trades_failure_does_not_block_other_sections() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_results(Ok(sample_results()));
        fetcher.push_trades(Err(server_error("trade table unavailable")));
        fetcher.push_returns(Ok(vec![]));

        let hydrated = hydrator(fetcher).hydrate("bt_1").await;

        assert!(!hydrated.is_complete());
        assert!(hydrated.results.is_ok(), "results section must survive");
        assert!(hydrated.returns.is_ok(), "returns section must survive");

        let errors = hydrated.section_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "trades");
    }

    #[tokio::test]
    async fn transport_errors_are_retried_per_section() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_results(Err(ApiError::Transport("reset by peer".into())));
        fetcher.push_results(Ok(sample_results()));
        fetcher.push_trades(Ok(vec![]));
        fetcher.push_returns(Ok(vec![]));

        let hydrated = hydrator(fetcher).hydrate("bt_1").await;
        assert!(hydrated.is_complete(), "one retry recovers the section");
    }

    #[tokio::test]
    async fn retries_stop_at_the_ceiling() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        // retry_limit = 3, so 4 attempts total.
        for _ in 0..4 {
            fetcher.push_results(Err(ApiError::Transport("down".into())));
        }
        fetcher.push_trades(Ok(vec![]));
        fetcher.push_returns(Ok(vec![]));

        let hydrated = hydrator(fetcher).hydrate("bt_1").await;
        assert!(matches!(hydrated.results, Err(ApiError::Transport(_))));
        assert!(hydrated.trades.is_ok());
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_results(Err(server_error("no such backtest")));
        fetcher.push_trades(Ok(vec![]));
        fetcher.push_returns(Ok(vec![]));

        let hydrated = hydrator(fetcher).hydrate("bt_1").await;
        assert!(matches!(hydrated.results, Err(ApiError::Server { .. })));
        // The script held exactly one results response; a retry would panic.
    }

    #[tokio::test]
    async fn retry_delays_follow_the_shared_policy() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        for _ in 0..3 {
            fetcher.push_results(Err(ApiError::Transport("down".into())));
        }
        fetcher.push_results(Ok(sample_results()));
        fetcher.push_trades(Ok(vec![]));
        fetcher.push_returns(Ok(vec![]));

        let sleeper = InstantSleeper::default();
        let hydrator = ResultHydrator::with_sleeper(fetcher, PollPolicy::default(), sleeper);
        let hydrated = hydrator.hydrate("bt_1").await;
        assert!(hydrated.is_complete());

        let delays = hydrator.sleeper.delays.lock();
        assert_eq!(
            *delays,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(4500),
            ]
        );
    }
}
