pub mod config;
pub mod correlation;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::{
    AppConfig, KindTopologyConfig, MessageQueueConfig, MessageQueueType, ObservabilityConfig,
    PipelineConfig, TopologyConfig, DEFAULT_MAX_RETRIES_COUNT, ENV_PREFIX,
};
pub use correlation::{
    CorrelationContext, CorrelationId, CorrelationScope, CorrelationTracker,
    DEFAULT_CORRELATION_HEADER,
};
pub use errors::{PipelineError, Result};
pub use models::{
    CommandKind, HeaderValue, Message, QueueArguments, QueueDeclaration, QueueHandle,
    RetryCount, Topology, TopologyHandles, TopologyRegistry, ARG_DEAD_LETTER_EXCHANGE,
    ARG_DEAD_LETTER_ROUTING_KEY, CONTENT_TYPE_JSON, DEFAULT_RETRY_HEADER,
};
pub use traits::{
    Acknowledger, Command, CommandHandler, Delivery, DeliveryHandler, DeliveryStream,
    MessageQueue,
};
