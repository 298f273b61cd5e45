//! Per-chain scanning pipeline: a producer that advances a persistent cursor
//! and feeds the durable log queue, a consumer that drains it through the
//! event decoder, and the flow projector that folds decoded events into
//! long-lived flow records.

pub mod decoder;
pub mod projector;
pub mod scan;

pub use projector::FlowProjector;
pub use scan::ChainScanner;
