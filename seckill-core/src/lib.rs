//! Seckill Core - flash-sale hot path
//!
//! Synchronous building blocks shared by the front tier and the back tier:
//! - Stock catalog cache (catalog.rs)
//! - Admission gate: blacklist + fixed-window counters (admission.rs)
//! - Stock-decrement critical section (engine.rs)
//! - Purchase token signing (token.rs)
//! - Lock-free in-process FIFO (queue.rs)
//! - Latency histogram (metrics.rs)
//!
//! No async runtime here; the server crate drives these from tokio tasks.

pub mod admission;
pub mod catalog;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod token;

pub use admission::{AccessLimits, AdmissionGate, DenyReason, Window};
pub use catalog::{ProductRecord, ProductStatus, StockCatalog, StockLevel};
pub use engine::{unix_now, Decision, EngineMetrics, LockStrategy, PurchaseHistory, SeckillEngine};
pub use metrics::{now_nanos, LatencyGuard, LatencyHistogram, LatencyStats};
pub use model::{correlation_key, Order, PurchaseRequest, PurchaseResult, StatusCode};
pub use queue::FifoQueue;
pub use token::TokenSigner;
