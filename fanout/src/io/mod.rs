//! Side-effecting collaborators: processes, config, remote transports.

pub mod config;
pub mod inventory;
pub mod lease;
pub mod process;
pub mod session;
pub mod transport;
