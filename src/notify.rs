//! Side-channel notifications: connectivity broadcasts, device notices and
//! job progress.
//!
//! Connectivity changes always go out. Notices and progress pass through a
//! [`NoticePolicy`] so deployments can keep the UI quiet (the default).

use chrono::Utc;
use serde_json::json;
use tauri::{AppHandle, Emitter};
use tracing::{debug, info};

pub const CONNECTION_STATUS_EVENT: &str = "datecs_printer_connection_status";
pub const NOTICE_EVENT: &str = "datecs_printer_notice";
pub const JOB_PROGRESS_EVENT: &str = "datecs_printer_job_progress";

/// Listener for session-level events.
pub trait ConnectionNotifier: Send + Sync {
    fn connection_changed(&self, connected: bool);

    /// Short transient message (paper out, overheat, errors).
    fn notice(&self, message: &str);

    /// Progress indicator for long-running jobs such as connecting.
    fn job_progress(&self, title: &str, message: &str, active: bool);
}

/// Whether transient notices reach the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoticePolicy {
    Emit,
    #[default]
    Suppress,
}

impl NoticePolicy {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            NoticePolicy::Emit
        } else {
            NoticePolicy::Suppress
        }
    }

    pub fn emits(self) -> bool {
        self == NoticePolicy::Emit
    }
}

// ---------------------------------------------------------------------------
// Tauri event notifier
// ---------------------------------------------------------------------------

pub struct TauriNotifier {
    app: AppHandle,
    policy: NoticePolicy,
}

impl TauriNotifier {
    pub fn new(app: AppHandle, policy: NoticePolicy) -> Self {
        Self { app, policy }
    }
}

impl ConnectionNotifier for TauriNotifier {
    fn connection_changed(&self, connected: bool) {
        info!(connected, "Printer connection status changed");
        let _ = self.app.emit(
            CONNECTION_STATUS_EVENT,
            json!({
                "isConnected": connected,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    fn notice(&self, message: &str) {
        if !self.policy.emits() {
            debug!(message, "Printer notice suppressed");
            return;
        }
        let _ = self.app.emit(
            NOTICE_EVENT,
            json!({
                "message": message,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    fn job_progress(&self, title: &str, message: &str, active: bool) {
        if !self.policy.emits() {
            return;
        }
        let _ = self.app.emit(
            JOB_PROGRESS_EVENT,
            json!({
                "title": title,
                "message": message,
                "active": active,
            }),
        );
    }
}
