pub mod events;
pub mod registry;
pub mod request;

pub use events::{EventBus, EventMetadata, ProxyEvent, ProxyEventKind};
pub use registry::{ProxyStats, ProxyStatsSnapshot};
pub use request::{PhaseTimings, RequestStats, RoutingDecision};
