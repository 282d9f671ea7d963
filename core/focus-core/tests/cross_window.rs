//! Integration coverage for cross-window focus routing and terminal resolution.

use std::sync::Arc;

use chrono::{Duration, Utc};
use focus_core::testing::{RecordingHost, ScriptedInspector};
use focus_core::{
    AffinityTracker, FocusEngine, FocusOutcome, FocusRouter, PollOutcome, SessionRecord,
    SessionStatus, Settings, StorageConfig, TargetMatch, TerminalBatch, TerminalHost,
    TerminalResolver,
};
use tempfile::tempdir;

fn window(root: &std::path::Path, host: &Arc<RecordingHost>) -> FocusEngine {
    FocusEngine::new(
        StorageConfig::with_root(root.to_path_buf()),
        Settings::default(),
        Arc::new(ScriptedInspector::default()),
        host.clone(),
    )
}

#[test]
fn test_stale_request_is_removed_without_acting() {
    let temp = tempdir().unwrap();
    let host = Arc::new(RecordingHost::new(Some("win-a"), &["/repo"]));
    host.add_terminal("t1", Some(11));
    let mut engine = window(temp.path(), &host);
    let session = SessionRecord::running("ppid-5", "/repo", Utc::now())
        .with_window_identity(Some("win-a".to_string()));
    engine.registry().store().write(&session).unwrap();

    let ten_seconds_ago = Utc::now() - Duration::seconds(10);
    let emitter = FocusRouter::new(
        engine.storage().focus_request_file(),
        engine.settings().focus_stale_after(),
    );
    assert!(emitter.request_focus(&session, ten_seconds_ago));

    let outcome = engine.poll_focus_request();

    assert!(matches!(outcome, PollOutcome::Stale(_)));
    assert!(!engine.storage().focus_request_file().exists());
    assert_eq!(host.activations(), 0);
    assert!(host.shown().is_empty());
}

#[test]
fn test_identity_request_is_consumed_by_owner_only() {
    let temp = tempdir().unwrap();
    let host_a = Arc::new(RecordingHost::new(Some("win-a"), &["/repo"]));
    let host_b = Arc::new(RecordingHost::new(Some("win-b"), &["/repo"]));
    let terminal_a = host_a.add_terminal("a-1", Some(11));
    host_b.add_terminal("b-1", Some(21));
    let mut window_a = window(temp.path(), &host_a);
    let mut window_b = window(temp.path(), &host_b);

    let session = SessionRecord::attention("ppid-5", "permission_prompt", "/repo", Utc::now())
        .unwrap()
        .with_window_identity(Some("win-a".to_string()));
    window_b.registry().store().write(&session).unwrap();

    // user clicks the session in window B
    assert_eq!(
        window_b.focus_session("ppid-5").unwrap(),
        FocusOutcome::Broadcast { delivered: true }
    );

    // B ignores it even though the workspace matches
    assert!(matches!(
        window_b.poll_focus_request(),
        PollOutcome::NotForUs(_)
    ));

    let outcome = window_a.poll_focus_request();
    assert!(matches!(
        outcome,
        PollOutcome::Claimed(ref request, TargetMatch::WindowIdentity) if request.session_id == "ppid-5"
    ));
    assert!(!window_a.storage().focus_request_file().exists());
    assert_eq!(host_a.activations(), 1);
    assert_eq!(host_a.shown(), vec![terminal_a]);

    assert_eq!(window_b.poll_focus_request(), PollOutcome::NoRequest);
    assert_eq!(host_b.activations(), 0);
    assert!(host_b.shown().is_empty());

    let stored = window_a.registry().store().read("ppid-5").unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Running);
    assert!(stored.reason.is_none());
}

#[test]
fn test_workspace_fallback_routes_legacy_sessions() {
    let temp = tempdir().unwrap();
    let host_a = Arc::new(RecordingHost::new(Some("win-a"), &["/work/api"]));
    let host_b = Arc::new(RecordingHost::new(Some("win-b"), &["/work/web"]));
    host_a.add_terminal("a-1", Some(11));
    let mut window_a = window(temp.path(), &host_a);
    let mut window_b = window(temp.path(), &host_b);

    // no window identity recorded
    let session = SessionRecord::running("ppid-5", "/work/api/server", Utc::now());
    window_b.registry().store().write(&session).unwrap();

    assert_eq!(
        window_b.focus_session("ppid-5").unwrap(),
        FocusOutcome::Broadcast { delivered: true }
    );
    assert!(matches!(
        window_a.poll_focus_request(),
        PollOutcome::Claimed(_, TargetMatch::Workspace)
    ));
    assert_eq!(host_a.activations(), 1);
}

#[test]
fn test_failed_activation_still_focuses_terminal() {
    let temp = tempdir().unwrap();
    let host = Arc::new(RecordingHost::new(Some("win-a"), &["/repo"]));
    let terminal = host.add_terminal("t1", Some(11));
    host.fail_activation();
    let mut engine = window(temp.path(), &host);
    let session = SessionRecord::running("ppid-5", "/repo", Utc::now())
        .with_window_identity(Some("win-a".to_string()));
    engine.registry().store().write(&session).unwrap();

    let emitter = FocusRouter::new(
        engine.storage().focus_request_file(),
        engine.settings().focus_stale_after(),
    );
    emitter.request_focus(&session, Utc::now());

    assert!(matches!(
        engine.poll_focus_request(),
        PollOutcome::Claimed(..)
    ));
    assert_eq!(host.shown(), vec![terminal]);
}

#[test]
fn test_distinct_terminal_pids_resolve_to_distinct_terminals() {
    let host = RecordingHost::new(None, &[]);
    let first = host.add_terminal("t1", Some(1001));
    let second = host.add_terminal("t2", Some(1002));
    host.add_terminal("t3", Some(1003));
    let mut resolver = TerminalResolver::new(
        Arc::new(ScriptedInspector::default()),
        15,
        std::time::Duration::from_secs(600),
    );
    let mut affinity = AffinityTracker::new();
    let mut batch = TerminalBatch::new(&host, host.open_terminals().unwrap());

    let a = SessionRecord::running("ppid-1", "/repo", Utc::now()).with_terminal_pid(Some(1001));
    let b = SessionRecord::running("ppid-2", "/repo", Utc::now()).with_terminal_pid(Some(1002));

    let resolved_a = resolver.resolve_and_remember(&a, &mut batch, &mut affinity).unwrap();
    let resolved_b = resolver.resolve_and_remember(&b, &mut batch, &mut affinity).unwrap();

    assert_eq!(resolved_a.terminal, first);
    assert_eq!(resolved_b.terminal, second);
    assert_eq!(affinity.len(), 2);
}
