//! Core domain model for the timelock monitor: supported chains, RPC endpoint
//! metadata, raw log records, decoded timelock events, flow projections, scan
//! progress, and notification configuration.

pub mod chain;
pub mod endpoint;
pub mod events;
pub mod flow;
pub mod notify;
pub mod options;
pub mod progress;
pub mod record;

pub use chain::{ChainMetadata, TimelockStandard};
pub use endpoint::EndpointMetadata;
pub use events::{CompoundCall, ScheduledCall, TimelockEvent, TimelockEventKind};
pub use flow::{
    Flow, FlowKey, FlowStatus, FlowTransition, NullTransitionConsumer, TransitionConsumer,
};
pub use notify::{Channel, ContractRole, DeliveryKey, DeliveryRecord, DeliveryStatus,
    NotificationConfig};
pub use options::{RpcPoolOptions, ScannerOptions};
pub use progress::{ScanProgress, ScanStatus};
pub use record::RawLogRecord;
