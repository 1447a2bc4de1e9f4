use std::sync::Arc;
use tracing::warn;

use crate::error::CommandError;
use crate::router::CommandRouter;

/// Single entry point for the app layer: `action` plus positional `args`.
/// Errors come back as `{errorCode, message, exception?}`.
#[tauri::command]
pub async fn datecs_printer_execute(
    action: String,
    args: Option<Vec<serde_json::Value>>,
    router: tauri::State<'_, Arc<CommandRouter>>,
) -> Result<serde_json::Value, CommandError> {
    router
        .execute(&action, args.unwrap_or_default())
        .await
        .map(|output| output.to_json())
        .inspect_err(|e| warn!(action = %action, error = %e, "Printer command failed"))
}

#[tauri::command]
pub async fn datecs_printer_state(
    router: tauri::State<'_, Arc<CommandRouter>>,
) -> Result<serde_json::Value, String> {
    serde_json::to_value(router.session().snapshot()).map_err(|e| e.to_string())
}
