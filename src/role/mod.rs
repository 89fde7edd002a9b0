mod consumer_pipeline;
mod error_reporter;
mod payload;
mod role_state;
mod state_machine;

pub(crate) use consumer_pipeline::PipelineSettings;
pub use error_reporter::CoordinationError;
pub(crate) use error_reporter::error_channel;
pub use error_reporter::ErrorStream;
pub(crate) use payload::PayloadGenerator;
pub(crate) use role_state::new as role_change_channel;
pub use role_state::Role;
pub use role_state::RoleChangeListener;
pub use role_state::RoleState;
pub(crate) use state_machine::{RoleSettings, RoleStateMachine};
