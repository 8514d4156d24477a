//! Application layer: turn orchestration, context management, provider
//! selection, and the event relay between orchestrator and transports.

mod context_manager;
mod events;
mod orchestrator;
mod registry;
mod relay;

pub use context_manager::{
    ContextConfig, ContextManager, ContextStats, PromptContext, SummariseReport,
};
pub use events::{TurnEvent, TurnOutcome, TurnRecord, WireUsage};
pub use orchestrator::{AdmittedTurn, CancelFlag, TurnLimits, TurnOrchestrator};
pub use registry::{ProviderRegistry, MOCK_PROVIDER};
pub use relay::{relay, RelayClosed, RelayReceiver, RelaySender, DEFAULT_RELAY_CAPACITY};
