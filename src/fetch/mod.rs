//! Origin fetching: the only module that talks to the network.
//!
//! Everything outbound goes through [`Fetcher`], which layers, in order:
//! the failed-URL registry (permanent 4xx fast-fail), the per-URL circuit
//! breaker, the process-wide [`RateGate`], and finally the shared reqwest
//! client with its browser identity headers.

mod breaker;
mod client;
mod gate;
mod fetcher;

pub use breaker::{
    CircuitBreaker, FailedUrlRegistry, Outcome, BLOCK_DURATION, FAILED_URL_TTL, FAILURE_THRESHOLD,
};
pub use client::{build_client, DEFAULT_USER_AGENT};
pub use fetcher::{
    Body, FetchError, FetchOptions, Fetcher, HeadReport, RangeOutcome, DISCOVERY_TIMEOUT,
    MAX_ATTEMPTS, MAX_BODY_SIZE,
};
pub use gate::{GateClass, RateGate};
