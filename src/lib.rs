//! Connection core for a paired mobile-to-desktop remote shell.
//!
//! This crate owns transport negotiation (LAN-direct, Tailscale, WebRTC),
//! authenticated framing, the connection lifecycle, and reconnection. It
//! never touches UI, persistence, or the terminal/session semantics
//! themselves — those live in the host application; this crate only
//! transports their messages.
//!
//! The typical flow: a host application builds an [`orchestrator::Orchestrator`]
//! over its [`strategy::Strategy`] implementations, calls
//! [`orchestrator::Orchestrator::connect`] to obtain a live
//! [`transport::Transport`], hands that transport plus the derived auth key
//! to a [`manager::ConnectionManager`], and drives reconnection via
//! [`reconnect::ReconnectionController`] whenever the manager's error stream
//! reports a disconnect.

pub mod codec;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod envelope;
pub mod errors;
pub mod manager;
pub mod net_util;
pub mod orchestrator;
pub mod progress;
pub mod reconnect;
pub mod signalling;
pub mod strategy;
pub mod transport;

pub use codec::{AuthKey, Codec};
pub use config::Config;
pub use credentials::{ConnectionCapabilities, Credentials, CredentialRepository, Endpoint, WifiNetworkLease};
pub use envelope::{Inbound, Outbound, SessionCommand, SessionEvent, StateSnapshot, TerminalCommand, TerminalEvent};
pub use errors::{CodecError, ConnectionError, ManagerError, OrchestratorError, StrategyError, TransportError};
pub use manager::{ConnectionManager, ReplayOne};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use progress::{FailedAttempt, ProgressEvent, ProgressSink};
pub use reconnect::{ReconnectGuards, ReconnectionController};
pub use signalling::{SignallingChannel, SignallingError, SignalledAnswer};
pub use strategy::{ConnectionContext, DetectOutcome, Strategy};
pub use transport::{Transport, TransportKind, TransportStats};
