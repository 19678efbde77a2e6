// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! voltaic-service: the design-session service.
//!
//! One [`SessionService`] per workspace orchestrates the whole stack:
//! resolve the target session and branch, materialize the circuit and (when
//! simulating) the live machine, do the work, persist a snapshot and/or new
//! revisions, and hand back structured data. The on-disk circuit model,
//! per-branch revision logs, and snapshots are the source of truth; the
//! in-memory machine is a cache.
//!
//! Concurrency: a brief service-wide cache lock hands out one
//! `Arc<Mutex<…>>` per session; everything touching a session's machine
//! serializes on that per-session lock. Ticks are atomic - no API exposes
//! partial-tick state.

mod branch_state;
mod daemon;
mod error;
mod events;
mod service;

pub use daemon::{run_daemon, DaemonRequest, DaemonResponse};
pub use error::{ErrorCode, ServiceError};
pub use events::{emit_poll_stream, emit_process_logs, emit_websocket_stream, EventKind, EventSink, StreamEvent, VecSink};
pub use service::{
    GetStateResult, MergeBranchResult, NetlistResult, RunTicksResult, SessionService,
};
