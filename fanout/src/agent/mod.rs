//! Interactive agent: a small program piped into a remote interpreter that
//! runs commands on request over a line-JSON protocol.

pub mod bootstrap;
pub mod protocol;
pub mod session;

pub use bootstrap::{Bootstrap, build_bootstrap};
pub use protocol::{ChannelState, ProtocolChannel, Reply, Request};
pub use session::{AgentSession, SessionPhase};
