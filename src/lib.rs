//! Datecs Printer Bridge - Tauri v2 backend
//!
//! Exposes a Bluetooth thermal printer to the web frontend through a single
//! command entry point (`datecs_printer_execute`). The frontend sends an
//! action name and positional arguments; the router validates them and the
//! printer session executes them against the one active connection.

use std::sync::Arc;
use std::time::Duration;
use tauri::Manager;
use tracing::{info, warn};

pub mod bluetooth;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod notify;
pub mod router;
pub mod session;
#[cfg(test)]
mod test_support;

use bluetooth::{RfcommAdapter, SocketStrategy};
use config::BridgeConfig;
use driver::EscPosDriver;
use notify::{NoticePolicy, TauriNotifier};
use router::CommandRouter;
use session::PrinterSession;

// ============================================================================
// App entry point
// ============================================================================

pub fn run() {
    // Structured logging (console + rolling file). The guard lives until exit.
    if let Some(guard) = logging::init(&logging::default_log_dir()) {
        std::mem::forget(guard);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("BUILD_GIT_SHA"),
        "Starting Datecs Printer Bridge"
    );

    tauri::Builder::default()
        .setup(|app| {
            let config_dir = app.path().app_config_dir()?;
            let config = BridgeConfig::load(&config_dir).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid printer config, using defaults");
                let mut fallback = BridgeConfig::default();
                fallback.apply_env(|key| std::env::var(key).ok());
                fallback
            });

            let strategy = SocketStrategy::detect(config.socket_strategy);
            let adapter = Arc::new(RfcommAdapter::new(&config, strategy));
            let driver = Arc::new(EscPosDriver::new(
                Duration::from_millis(config.handshake_timeout_ms),
                Duration::from_millis(config.read_timeout_ms),
            ));
            let notifier = Arc::new(TauriNotifier::new(
                app.handle().clone(),
                NoticePolicy::from_enabled(config.notices_enabled),
            ));
            info!(
                strategy = ?strategy,
                bindings = config.bindings.len(),
                auto_reconnect = config.auto_reconnect,
                notices = config.notices_enabled,
                "Printer bridge configured"
            );

            let session = Arc::new(PrinterSession::new(adapter, driver, notifier, config));
            app.manage(Arc::new(CommandRouter::new(session)));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::printer::datecs_printer_execute,
            commands::printer::datecs_printer_state,
        ])
        .build(tauri::generate_context!())
        .expect("error while building Datecs Printer Bridge")
        .run(|handle, event| {
            if let tauri::RunEvent::Exit = event {
                if let Some(router) = handle.try_state::<Arc<CommandRouter>>() {
                    router.session().shutdown();
                }
            }
        });
}
