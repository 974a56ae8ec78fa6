pub mod chain;
pub mod clock;
pub mod email;
pub mod entities;
pub mod error;
pub mod event;
pub mod phase;
pub mod route;
pub mod sla;
pub mod state_machine;
pub mod task;
pub mod types;
pub mod workflow;

pub use chain::{Chain, ChainEvidence, ChainLifecycle, ChainScore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use email::{Email, Importance};
pub use entities::{Entities, EntityItem, MoneyValue};
pub use error::ErrorKind;
pub use event::{Event, EventTopic, SCHEMA_VERSION};
pub use phase::{
    ActionItem, Phase, Phase1Result, Phase2Result, Phase3Result, PhaseResult, PhaseStatus,
    RejectedEntity, RevenueImpact,
};
pub use route::RouteDecision;
pub use sla::{SlaPolicy, SlaStatus, sla_status, sla_status_for_deadline};
pub use state_machine::EmailState;
pub use task::{Priority, WorkflowTask};
pub use types::{ChainId, EmailId, MessageId, ModelId, TaskId};
pub use workflow::{LifecycleMarker, WorkflowType};
