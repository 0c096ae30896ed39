//! chain-steward: provisioning and supervision for chain-registry node daemons
//!
//! Given a chain-registry tree, this crate can:
//! - Acquire a node binary (precompiled download or a source build cascade)
//! - Initialize a per-chain home directory and patch its config files
//! - Bootstrap state sync from a trusted checkpoint on a live RPC endpoint
//! - Launch and supervise many node processes concurrently
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         STEWARD                             │
//! │                                                              │
//! │   ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌────────┐  │
//! │   │ Acquire  │──▶│ Init    │──▶│ StateSync │──▶│ Start  │  │
//! │   └──────────┘   └─────────┘   └───────────┘   └────────┘  │
//! │                                                    │        │
//! │          ┌──────────────┐        ┌────────────┐    ▼        │
//! │          │    Reaper    │───────▶│  Registry  │◀──────      │
//! │          └──────────────┘        └────────────┘             │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod acquire;
pub mod api;
pub mod catalog;
pub mod config;
pub mod logs;
pub mod node;
pub mod registry;
pub mod steward;

pub use catalog::{ChainCatalog, ChainDescriptor, RegistryCatalog};
pub use config::Config;
pub use logs::{LogBook, LogSink};
pub use node::{Node, NodeError, NodeStatus, ProcessState};
pub use steward::Steward;
