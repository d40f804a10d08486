//! Flashtest Client Library
//!
//! Client-side lifecycle for backtests executed by an external backend:
//! build and validate a request, submit it, poll status with exponential
//! backoff, hydrate result payloads with per-section failure isolation, and
//! aggregate several backtests for side-by-side comparison.
//!
//! All computation happens server-side; this crate only submits, polls, and
//! decodes.

pub mod client;
pub mod compare;
pub mod config;
pub mod error;
pub mod hydrator;
pub mod models;
pub mod poller;
pub mod request;
pub mod session;

pub use client::BacktestClient;
pub use compare::{ComparisonAggregator, ComparisonSet, MAX_COMPARE};
pub use config::Config;
pub use error::{ApiError, ValidationError};
pub use hydrator::{HydratedResults, ResultHydrator};
pub use models::{
    BacktestRequest, BacktestResults, BacktestState, BacktestStatus, ReturnData, Trade,
};
pub use poller::{CancelHandle, PollOutcome, PollPolicy, StatusPoller};
pub use request::BacktestRequestBuilder;
pub use session::Session;
