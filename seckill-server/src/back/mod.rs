//! バック層: エンジン worker と注文シンク

pub mod order_sink;
pub mod worker;

pub use order_sink::OrderSink;
pub use worker::EngineWorker;
