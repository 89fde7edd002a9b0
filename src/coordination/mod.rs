mod changer;
mod failover;
mod heartbeat;
mod master_lease;

pub(crate) use changer::Changer;
pub(crate) use failover::FailoverWatch;
pub use failover::TickOutcome;
pub(crate) use heartbeat::Heartbeat;
pub(crate) use master_lease::MasterLease;
