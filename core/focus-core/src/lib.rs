//! # focus-core
//!
//! Cross-process session registry and cross-window focus routing for
//! agent-focus.
//!
//! Independent agent processes publish their state as one JSON file each under
//! `<stateDir>/sessions/`. Every window runs a [`FocusEngine`] that replays
//! those files into an in-memory registry, reclaims sessions whose process is
//! gone, and routes "focus this session" requests to the window that owns the
//! session through one shared, polled file.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The engine runs one event loop on the
//!   caller's thread; the directory watcher is the only background thread.
//! - **No cross-process locks**: Each session file has one writer. Races are
//!   settled by atomic rename and last-write-wins.
//! - **Graceful degradation**: Files caught mid-write, watcher hiccups and
//!   failed process probes are logged and retried next cycle, never surfaced.
//! - **Pluggable platform seams**: [`ProcessInspector`] and [`TerminalHost`]
//!   are traits, with in-memory fakes in `testing` (feature `test-helpers`).

pub mod affinity;
pub mod aliases;
pub mod engine;
pub mod error;
pub mod focus;
pub mod host;
pub mod liveness;
pub mod path_utils;
pub mod process;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod watcher;

pub use affinity::{AffinityTracker, Resolution, ResolvedVia, TerminalBatch, TerminalResolver};
pub use aliases::AliasStore;
pub use engine::{CleanupReport, EngineHandle, FocusEngine, FocusOutcome};
pub use error::{FocusError, ProbeError, Result};
pub use focus::{FocusRouter, PollOutcome, TargetMatch, WindowTarget};
pub use host::{HostError, TerminalHost, TerminalId};
pub use liveness::{LivenessProber, ProbeOutcome};
pub use process::{call_with_timeout, ProcessInspector, SysinfoInspector};
pub use registry::{RegistrySnapshot, SessionRegistry, StatusCounts};
pub use settings::Settings;
pub use storage::StorageConfig;
pub use store::SessionStore;
pub use watcher::DirectoryNotifier;

pub use agent_focus_protocol::{FocusRequest, SessionRecord, SessionStatus};
