//! Side-by-side comparison of completed backtests.
//!
//! A parallel fan-out of result fetches, capped at [`MAX_COMPARE`]
//! identifiers. Every identifier keeps its own success/error entry: one
//! slow or broken backtest never blocks the table for the rest. Arrival
//! order is irrelevant: results land in a keyed structure and the table is
//! built from the requested order.

use crate::error::{ApiError, ValidationError};
use crate::hydrator::{fetch_with_retry, ResultFetcher};
use crate::models::{BacktestResults, CORE_METRICS};
use crate::poller::{PollPolicy, Sleeper, TokioSleeper};
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Most backtests one comparison can hold.
pub const MAX_COMPARE: usize = 5;

/// One identifier's slot in a comparison.
#[derive(Debug)]
pub struct ComparisonEntry {
    pub backtest_id: String,
    pub outcome: Result<BacktestResults, ApiError>,
}

/// All entries of one comparison, in requested order.
#[derive(Debug)]
pub struct ComparisonSet {
    entries: Vec<ComparisonEntry>,
}

impl ComparisonSet {
    pub fn entries(&self) -> &[ComparisonEntry] {
        &self.entries
    }

    pub fn get(&self, backtest_id: &str) -> Option<&ComparisonEntry> {
        self.entries.iter().find(|e| e.backtest_id == backtest_id)
    }

    pub fn loaded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.loaded()
    }

    /// Align metric names across all loaded entries: core metrics in
    /// canonical order, then any additional metrics alphabetically.
    pub fn table(&self) -> ComparisonTable {
        let mut extra: BTreeSet<String> = BTreeSet::new();
        for entry in &self.entries {
            if let Ok(results) = &entry.outcome {
                extra.extend(results.metrics.additional.keys().cloned());
            }
        }

        let mut rows = Vec::with_capacity(CORE_METRICS.len() + extra.len());
        for (key, label) in CORE_METRICS {
            rows.push(self.metric_row(key, label.to_string()));
        }
        for key in &extra {
            rows.push(self.metric_row(key, key.clone()));
        }

        ComparisonTable {
            backtest_ids: self
                .entries
                .iter()
                .map(|e| e.backtest_id.clone())
                .collect(),
            rows,
        }
    }

    fn metric_row(&self, key: &str, label: String) -> MetricRow {
        MetricRow {
            label,
            values: self
                .entries
                .iter()
                .map(|e| match &e.outcome {
                    Ok(results) => results.metrics.get(key),
                    Err(_) => None,
                })
                .collect(),
        }
    }
}

/// One metric across all compared backtests. `None` where an entry failed
/// to load or never reported that metric.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// Metric names down, backtest identifiers across.
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    pub backtest_ids: Vec<String>,
    pub rows: Vec<MetricRow>,
}

impl ComparisonTable {
    /// Render as CSV: one header row of identifiers, one line per metric,
    /// `N/A` where a value is missing.
    pub fn to_csv(&self) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header = vec!["Metric".to_string()];
        header.extend(self.backtest_ids.iter().cloned());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.label.clone()];
            record.extend(row.values.iter().map(|v| match v {
                Some(value) => value.to_string(),
                None => "N/A".to_string(),
            }));
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("CSV flush failed: {}", e))?;
        Ok(String::from_utf8(bytes)?)
    }
}

pub struct ComparisonAggregator<F: ?Sized, S = TokioSleeper> {
    fetcher: Arc<F>,
    policy: PollPolicy,
    sleeper: S,
}

impl<F: ResultFetcher + ?Sized> ComparisonAggregator<F> {
    pub fn new(fetcher: Arc<F>, policy: PollPolicy) -> Self {
        Self::with_sleeper(fetcher, policy, TokioSleeper)
    }
}

impl<F: ResultFetcher + ?Sized, S: Sleeper> ComparisonAggregator<F, S> {
    pub fn with_sleeper(fetcher: Arc<F>, policy: PollPolicy, sleeper: S) -> Self {
        Self {
            fetcher,
            policy,
            sleeper,
        }
    }

    /// Fetch results for every identifier concurrently. Duplicates are
    /// dropped; more than [`MAX_COMPARE`] distinct identifiers is a local
    /// validation error and nothing is fetched.
    pub async fn fetch_all(&self, backtest_ids: &[String]) -> Result<ComparisonSet, ValidationError> {
        let mut ids: Vec<String> = Vec::new();
        for id in backtest_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }

        if ids.is_empty() {
            return Err(ValidationError::new(
                "backtest_ids",
                "Select at least one backtest to compare",
            ));
        }
        if ids.len() > MAX_COMPARE {
            return Err(ValidationError::new(
                "backtest_ids",
                format!("At most {} backtests can be compared", MAX_COMPARE),
            ));
        }

        let entries = join_all(ids.iter().map(|id| async move {
            let outcome = fetch_with_retry(&self.policy, &self.sleeper, "compare", || {
                self.fetcher.fetch_results(id)
            })
            .await;
            ComparisonEntry {
                backtest_id: id.clone(),
                outcome,
            }
        }))
        .await;

        let set = ComparisonSet { entries };
        info!(
            requested = ids.len(),
            loaded = set.loaded(),
            failed = set.failed(),
            "Comparison fetch finished"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacktestMetrics, ReturnData, Trade};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Per-identifier canned outcomes; trades/returns are never touched by
    /// the aggregator.
    #[derive(Default)]
    struct MapFetcher {
        results: Mutex<HashMap<String, Result<BacktestResults, ApiError>>>,
    }

    impl MapFetcher {
        fn insert(&self, id: &str, outcome: Result<BacktestResults, ApiError>) {
            self.results.lock().insert(id.to_string(), outcome);
        }
    }

    #[async_trait]
    impl ResultFetcher for MapFetcher {
        async fn fetch_results(&self, id: &str) -> Result<BacktestResults, ApiError> {
            self.results
                .lock()
                .remove(id)
                .unwrap_or_else(|| panic!("unexpected fetch for {}", id))
        }
        async fn fetch_trades(&self, _id: &str) -> Result<Vec<Trade>, ApiError> {
            unreachable!("aggregator never fetches trades")
        }
        async fn fetch_returns(&self, _id: &str) -> Result<Vec<ReturnData>, ApiError> {
            unreachable!("aggregator never fetches returns")
        }
    }

    fn results_with(id: &str, sharpe: f64, extra: &[(&str, f64)]) -> BacktestResults {
        BacktestResults {
            backtest_id: id.to_string(),
            metrics: BacktestMetrics {
                total_return: 10.0,
                sharpe,
                additional: extra
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                ..Default::default()
            },
            insights: String::new(),
            improvements: String::new(),
            strategy_code: String::new(),
            start_date: None,
            end_date: None,
        }
    }

    fn server_error() -> ApiError {
        ApiError::Server {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            detail: "results unavailable".to_string(),
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn aggregator(fetcher: Arc<MapFetcher>) -> ComparisonAggregator<MapFetcher> {
        ComparisonAggregator::new(fetcher, PollPolicy::default())
    }

    #[tokio::test]
    async fn one_failure_leaves_other_entries_unaffected() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.insert("bt_a", Ok(results_with("bt_a", 1.2, &[])));
        fetcher.insert("bt_b", Err(server_error()));
        fetcher.insert("bt_c", Ok(results_with("bt_c", 0.9, &[])));

        let set = aggregator(fetcher)
            .fetch_all(&ids(&["bt_a", "bt_b", "bt_c"]))
            .await
            .unwrap();

        assert_eq!(set.entries().len(), 3);
        assert_eq!(set.loaded(), 2);
        assert_eq!(set.failed(), 1);
        assert!(set.get("bt_a").unwrap().outcome.is_ok());
        assert!(set.get("bt_b").unwrap().outcome.is_err());
        assert!(set.get("bt_c").unwrap().outcome.is_ok());
    }

    #[tokio::test]
    async fn over_cap_is_rejected_without_fetching() {
        let fetcher = Arc::new(MapFetcher::default());
        let err = aggregator(fetcher)
            .fetch_all(&ids(&["a", "b", "c", "d", "e", "f"]))
            .await
            .unwrap_err();
        assert_eq!(err.field, "backtest_ids");
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let fetcher = Arc::new(MapFetcher::default());
        let err = aggregator(fetcher).fetch_all(&[]).await.unwrap_err();
        assert_eq!(err.field, "backtest_ids");
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_into_one_entry() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.insert("bt_a", Ok(results_with("bt_a", 1.0, &[])));

        let set = aggregator(fetcher)
            .fetch_all(&ids(&["bt_a", "bt_a"]))
            .await
            .unwrap();
        assert_eq!(set.entries().len(), 1);
    }

    #[tokio::test]
    async fn table_aligns_core_and_additional_metrics() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.insert("bt_a", Ok(results_with("bt_a", 1.2, &[("calmar", 0.7)])));
        fetcher.insert("bt_b", Ok(results_with("bt_b", 0.4, &[("turnover", 3.2)])));

        let set = aggregator(fetcher)
            .fetch_all(&ids(&["bt_a", "bt_b"]))
            .await
            .unwrap();
        let table = set.table();

        assert_eq!(table.backtest_ids, vec!["bt_a", "bt_b"]);
        // 9 core rows plus the union of additional metrics.
        assert_eq!(table.rows.len(), CORE_METRICS.len() + 2);

        let sharpe = table.rows.iter().find(|r| r.label == "Sharpe").unwrap();
        assert_eq!(sharpe.values, vec![Some(1.2), Some(0.4)]);

        let calmar = table.rows.iter().find(|r| r.label == "calmar").unwrap();
        assert_eq!(calmar.values, vec![Some(0.7), None]);
    }

    #[tokio::test]
    async fn csv_export_marks_missing_values() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.insert("bt_a", Ok(results_with("bt_a", 1.5, &[])));
        fetcher.insert("bt_b", Err(server_error()));

        let set = aggregator(fetcher)
            .fetch_all(&ids(&["bt_a", "bt_b"]))
            .await
            .unwrap();
        let csv = set.table().to_csv().unwrap();

        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "Metric,bt_a,bt_b");
        let sharpe_line = csv
            .lines()
            .find(|l| l.starts_with("Sharpe"))
            .unwrap();
        assert_eq!(sharpe_line, "Sharpe,1.5,N/A");
    }
}
