//! Event handler for Claude Code hooks.
//!
//! Reads JSON from stdin, maps the hook event to a session transition, and
//! writes it.
//!
//! ## Mapping
//!
//! ```text
//! SessionStart / UserPromptSubmit        → running
//! PreToolUse / PostToolUse               → running  (also clears a stale attention)
//! PermissionRequest                      → attention (permission_prompt)
//! Notification permission_prompt         → attention (permission_prompt)
//! Notification elicitation_dialog        → attention (elicitation_dialog)
//! Notification idle_prompt               → idle
//! Stop                                   → idle     (unless stop_hook_active=true)
//! SessionEnd                             → removes session file
//! ```

use std::env;
use std::io::{self, Read};

use focus_core::StorageConfig;
use serde::Deserialize;

use crate::producer::{self, HookError, SessionContext, Transition};
use crate::SessionArgs;

/// Set to `1` to make the hook a no-op (e.g. for nested agent invocations).
const DISABLE_ENV: &str = "AGENT_FOCUS_DISABLE";

const PERMISSION_PROMPT: &str = "permission_prompt";
const ELICITATION_DIALOG: &str = "elicitation_dialog";
const IDLE_PROMPT: &str = "idle_prompt";

/// The subset of the Claude Code hook payload this handler reads.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
}

impl HookInput {
    /// `None` for events that do not change session state.
    pub fn transition(&self) -> Option<Transition> {
        let event = self.hook_event_name.as_deref()?;
        match event {
            "SessionStart" | "UserPromptSubmit" | "PreToolUse" | "PostToolUse" => {
                Some(Transition::Running)
            }
            "PermissionRequest" => Some(Transition::Attention {
                reason: PERMISSION_PROMPT.to_string(),
            }),
            "Notification" => match self.notification_type.as_deref() {
                Some(kind @ (PERMISSION_PROMPT | ELICITATION_DIALOG)) => {
                    Some(Transition::Attention {
                        reason: kind.to_string(),
                    })
                }
                Some(IDLE_PROMPT) => Some(Transition::Idle),
                _ => None,
            },
            "Stop" if self.stop_hook_active == Some(true) => None,
            "Stop" => Some(Transition::Idle),
            "SessionEnd" => Some(Transition::End),
            _ => None,
        }
    }
}

pub fn run(storage: &StorageConfig, args: &SessionArgs) -> Result<(), HookError> {
    if env::var(DISABLE_ENV).map(|v| v == "1").unwrap_or(false) {
        // Drain stdin and exit
        let _ = io::stdin().read_to_end(&mut Vec::new());
        return Ok(());
    }

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(HookError::Stdin)?;

    if input.trim().is_empty() {
        return Ok(());
    }

    let hook_input: HookInput = serde_json::from_str(&input)?;
    handle_hook_input(storage, args, &hook_input)
}

fn handle_hook_input(
    storage: &StorageConfig,
    args: &SessionArgs,
    hook_input: &HookInput,
) -> Result<(), HookError> {
    let Some(transition) = hook_input.transition() else {
        tracing::debug!(
            event = ?hook_input.hook_event_name,
            notification = ?hook_input.notification_type,
            "Skipping event"
        );
        return Ok(());
    };

    let args = SessionArgs {
        cwd: args.cwd.clone().or_else(|| hook_input.cwd.clone()),
        ..args.clone()
    };
    let context = SessionContext::resolve(storage, &args)?;
    tracing::debug!(
        event = ?hook_input.hook_event_name,
        session = %context.session_id,
        agent_session = ?hook_input.session_id,
        "Handling hook event"
    );
    producer::apply(storage, &context, &transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_focus_protocol::SessionStatus;
    use focus_core::SessionStore;
    use tempfile::tempdir;

    fn input(json: &str) -> HookInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_lifecycle_events() {
        for event in ["SessionStart", "UserPromptSubmit", "PreToolUse", "PostToolUse"] {
            let payload = format!(r#"{{"hook_event_name":"{}"}}"#, event);
            assert_eq!(input(&payload).transition(), Some(Transition::Running));
        }
        assert_eq!(
            input(r#"{"hook_event_name":"SessionEnd"}"#).transition(),
            Some(Transition::End)
        );
        assert_eq!(
            input(r#"{"hook_event_name":"Stop"}"#).transition(),
            Some(Transition::Idle)
        );
        assert_eq!(
            input(r#"{"hook_event_name":"Stop","stop_hook_active":true}"#).transition(),
            None
        );
    }

    #[test]
    fn maps_notifications() {
        assert_eq!(
            input(r#"{"hook_event_name":"Notification","notification_type":"elicitation_dialog"}"#)
                .transition(),
            Some(Transition::Attention {
                reason: "elicitation_dialog".to_string()
            })
        );
        assert_eq!(
            input(r#"{"hook_event_name":"Notification","notification_type":"idle_prompt"}"#)
                .transition(),
            Some(Transition::Idle)
        );
        assert_eq!(
            input(r#"{"hook_event_name":"Notification","notification_type":"auth_success"}"#)
                .transition(),
            None
        );
        assert_eq!(
            input(r#"{"hook_event_name":"PermissionRequest"}"#).transition(),
            Some(Transition::Attention {
                reason: "permission_prompt".to_string()
            })
        );
    }

    #[test]
    fn unknown_or_missing_event_is_skipped() {
        assert_eq!(input(r#"{"hook_event_name":"PreCompact"}"#).transition(), None);
        assert_eq!(input("{}").transition(), None);
    }

    #[test]
    fn payload_cwd_is_used_when_no_flag() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let args = SessionArgs {
            session_id: Some("ppid-31".to_string()),
            terminal_pid: Some(30),
            ..SessionArgs::default()
        };
        let hook_input = input(
            r#"{"hook_event_name":"PermissionRequest","session_id":"abc","cwd":"/work/api"}"#,
        );

        handle_hook_input(&storage, &args, &hook_input).unwrap();

        let record = SessionStore::new(storage.sessions_dir())
            .read("ppid-31")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SessionStatus::Attention);
        assert_eq!(record.cwd.as_deref(), Some("/work/api"));
        assert_eq!(record.terminal_pid, Some(30));
    }
}
