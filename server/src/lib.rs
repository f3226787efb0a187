//! # Collaborative Canvas Server Library
//!
//! This library implements the authoritative server for a shared pixel
//! canvas: many concurrent clients paint single cells onto a grid of
//! 128×128 panels, and every accepted paint is fanned out to all other
//! viewers over a compact binary websocket protocol.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Canvas State
//! The server owns the only copy of the grid. Conflicting paints are
//! resolved by a last-write-wins timestamp rule in the panel store, not
//! by arrival order, so out-of-order delivery cannot corrupt state.
//!
//! ### Client Management
//! Each websocket connection becomes an actor with its own inbound and
//! outbound task, a bounded outbound queue, and a per-connection token
//! bucket for paint messages. Admission is checked once, before the
//! upgrade, against an external verification service.
//!
//! ### Broadcast Fan-out
//! A single hub task owns the membership set and delivers every applied
//! update to every registered client with a non-blocking enqueue. A
//! client whose queue is full is evicted immediately rather than ever
//! stalling delivery to the others.
//!
//! ### Persistence
//! A timer task periodically tiles the grid into one PNG artifact, and
//! startup restores the most recent artifact with all timestamps reset.
//!
//! ## Module Organization
//!
//! - [`board`]: the shared panel grid and its locking discipline
//! - [`hub`]: membership set and broadcast coordinator
//! - [`connection`]: per-connection upgrade handler and actor loops
//! - [`limiter`]: token-bucket rate limiting for paint messages
//! - [`snapshot`]: periodic PNG snapshots and startup restore
//! - [`admission`]: one-shot pre-upgrade token verification
//! - [`config`]: the command-line configuration surface
//!
//! ## Concurrency Model
//!
//! One tokio task per connection direction, one singleton hub task, one
//! snapshot timer. The grid sits behind a single reader/writer lock
//! (shared for bulk reads, exclusive for O(1) cell writes); the hub's
//! client set is confined to its own task and needs no lock at all. No
//! operation blocks the hub for longer than a bounded-queue enqueue.

pub mod admission;
pub mod board;
pub mod config;
pub mod connection;
pub mod hub;
pub mod limiter;
pub mod snapshot;

use std::sync::Arc;

/// Shared state injected into every upgrade handler invocation.
pub struct AppState {
    pub store: Arc<board::PanelStore>,
    pub hub: hub::Hub,
    pub gate: admission::Gate,
    pub config: config::Config,
}
