//! # CTng Monitor
//!
//! The agreement core of the gossip network. Each monitor runs one
//! [`IssuerFsm`] per known CA and Logger, validates signed heads, detects
//! equivocation, gossips Reed-Solomon shards with its peers until the
//! published artifact reconstructs and re-binds to the head, and then
//! aggregates BLS fragments into a threshold signature, measuring how long
//! convergence took.
//!
//! The [`Engine`] is transport-independent: the [`server`] module maps the
//! canonical HTTP paths onto it, and tests drive it through an in-process
//! [`Outbound`] implementation.

pub mod engine;
pub mod error;
pub mod fsm;
pub mod outbound;
pub mod revocation;
pub mod server;
pub mod transparency;
pub mod wire;

pub use engine::{CaFsm, Engine, LoggerFsm};
pub use error::MonitorError;
pub use fsm::{Command, HeadAdmission, IssuerFsm, SigAdmission, State};
pub use outbound::{HttpOutbound, Outbound};
