pub mod agent;
pub mod auth;
pub mod broadcast;
pub mod command;
pub mod notifier;
pub mod packetloss;
pub mod ping;
pub mod probe;
pub mod scheduler;
pub mod store;

// Re-export the service handles components wire together at startup.
pub use agent::AgentPool;
pub use broadcast::Broadcaster;
pub use notifier::Notifier;
pub use packetloss::Supervisor;
pub use probe::ProbeEngine;
pub use scheduler::Scheduler;
pub use store::Store;
