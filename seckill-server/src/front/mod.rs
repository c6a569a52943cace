//! フロント層: 入場判定・相関・投入・結果配送

pub mod logging;
pub mod registry;
pub mod router;
pub mod service;
pub mod submit;

pub use logging::LoggingSeckill;
pub use registry::CorrelationRegistry;
pub use router::ResultRouter;
pub use service::{PurchaseCall, Seckill, SeckillService};
pub use submit::Submitter;
