//! Channel-level façade: membership, options, the `Network` handle and contracts.

mod channel;
mod contract;
mod options;
mod orchestrator;

pub use channel::Channel;
pub use contract::Contract;
pub use options::{GatewayOptions, ReconnectOptions};
pub use orchestrator::Network;
