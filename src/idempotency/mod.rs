pub mod codec;
pub mod coordinator;
pub mod hooks;
pub mod record;

pub use codec::{EnvelopeCodec, ErrorCode, ResponseEnvelope};
pub use coordinator::{
    CoordinatorConfig, CoordinatorMetrics, CoordinatorMetricsSnapshot, RequestCoordinator,
};
pub use hooks::{IdempotentOperation, OperationRequest, Outcome};
pub use record::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore, RecordUpdate};
