//! Command router: action name + positional JSON arguments → session call.
//!
//! Arguments are loosely typed on the app side, so each one goes through a
//! small coercion step (integer, boolean, string). Anything that cannot be
//! coerced is reported as an invalid argument instead of reaching the
//! session.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::bluetooth::PairedDevice;
use crate::error::{CommandError, ErrorCode};
use crate::session::PrinterSession;

// ---------------------------------------------------------------------------
// Command identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ListDevices,
    Connect,
    Disconnect,
    FeedPaper,
    PrintText,
    GetStatus,
    GetTemperature,
    ConfigureBarcode,
    PrintBarcode,
    PrintImage,
    PrintLogo,
    PrintSelfTest,
}

impl Command {
    /// Accepts the app-layer action names and their kebab-case aliases.
    pub fn parse(action: &str) -> Result<Self, CommandError> {
        Ok(match action.trim() {
            "listBluetoothDevices" | "list-devices" => Command::ListDevices,
            "connect" => Command::Connect,
            "disconnect" => Command::Disconnect,
            "feedPaper" | "feed-paper" => Command::FeedPaper,
            "printText" | "print-text" => Command::PrintText,
            "getStatus" | "get-status" => Command::GetStatus,
            "getTemperature" | "get-temperature" => Command::GetTemperature,
            "setBarcode" | "configure-barcode" => Command::ConfigureBarcode,
            "printBarcode" | "print-barcode" => Command::PrintBarcode,
            "printImage" | "print-image" => Command::PrintImage,
            "printLogo" | "print-logo" => Command::PrintLogo,
            "printSelfTest" | "print-self-test" => Command::PrintSelfTest,
            other => {
                return Err(CommandError::with_cause(
                    ErrorCode::UnsupportedCommand,
                    format!("unknown action '{other}'"),
                ))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::ListDevices => "listBluetoothDevices",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::FeedPaper => "feedPaper",
            Command::PrintText => "printText",
            Command::GetStatus => "getStatus",
            Command::GetTemperature => "getTemperature",
            Command::ConfigureBarcode => "setBarcode",
            Command::PrintBarcode => "printBarcode",
            Command::PrintImage => "printImage",
            Command::PrintLogo => "printLogo",
            Command::PrintSelfTest => "printSelfTest",
        }
    }

    /// Code reported when the blocking worker running the command dies.
    fn failure_code(self) -> ErrorCode {
        match self {
            Command::ListDevices => ErrorCode::AdapterUnavailable,
            Command::Connect => ErrorCode::ConnectFailed,
            Command::Disconnect => ErrorCode::DisconnectFailed,
            Command::FeedPaper => ErrorCode::FeedFailed,
            Command::PrintText | Command::PrintLogo => ErrorCode::PrintFailed,
            Command::GetStatus => ErrorCode::StatusFailed,
            Command::GetTemperature => ErrorCode::TemperatureFailed,
            Command::ConfigureBarcode => ErrorCode::BarcodeConfigFailed,
            Command::PrintBarcode => ErrorCode::BarcodePrintFailed,
            Command::PrintImage => ErrorCode::ImagePrintFailed,
            Command::PrintSelfTest => ErrorCode::SelfTestFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Argument coercion
// ---------------------------------------------------------------------------

fn invalid(index: usize, expected: &str, value: Option<&Value>) -> CommandError {
    let detail = match value {
        Some(v) => format!("argument {index}: expected {expected}, got {v}"),
        None => format!("argument {index}: missing {expected}"),
    };
    CommandError::with_cause(ErrorCode::InvalidArgument, detail)
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One parsed command with its positional arguments.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: Command,
    args: Vec<Value>,
}

impl CommandRequest {
    pub fn new(action: &str, args: Vec<Value>) -> Result<Self, CommandError> {
        Ok(Self {
            command: Command::parse(action)?,
            args,
        })
    }

    fn int(&self, index: usize) -> Result<i64, CommandError> {
        let value = self.args.get(index);
        value
            .and_then(value_to_i64)
            .ok_or_else(|| invalid(index, "integer", value))
    }

    fn boolean(&self, index: usize) -> Result<bool, CommandError> {
        let value = self.args.get(index);
        value
            .and_then(value_to_bool)
            .ok_or_else(|| invalid(index, "boolean", value))
    }

    fn string(&self, index: usize) -> Result<String, CommandError> {
        let value = self.args.get(index);
        value
            .and_then(value_to_string)
            .ok_or_else(|| invalid(index, "string", value))
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Ack,
    Message(&'static str),
    Status(i32),
    Temperature(i32),
    Devices(Vec<PairedDevice>),
}

impl CommandOutput {
    pub fn to_json(&self) -> Value {
        match self {
            CommandOutput::Ack => json!({ "success": true }),
            CommandOutput::Message(message) => json!({ "success": true, "message": message }),
            CommandOutput::Status(status) => json!(status),
            CommandOutput::Temperature(temperature) => json!(temperature),
            CommandOutput::Devices(devices) => json!(devices),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct CommandRouter {
    session: Arc<PrinterSession>,
}

impl CommandRouter {
    pub fn new(session: Arc<PrinterSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<PrinterSession> {
        &self.session
    }

    pub async fn execute(&self, action: &str, args: Vec<Value>) -> Result<CommandOutput, CommandError> {
        let request = CommandRequest::new(action, args)?;
        self.dispatch(request).await
    }

    /// Run a blocking session call on the blocking pool.
    async fn blocking<T, F>(&self, command: Command, op: F) -> Result<T, CommandError>
    where
        T: Send + 'static,
        F: FnOnce(&PrinterSession) -> Result<T, CommandError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || op(&session))
            .await
            .map_err(|e| CommandError::with_cause(command.failure_code(), e))?
    }

    pub async fn dispatch(&self, request: CommandRequest) -> Result<CommandOutput, CommandError> {
        let command = request.command;
        debug!(command = command.name(), args = request.args.len(), "Dispatching printer command");

        match command {
            Command::ListDevices => self
                .blocking(command, |s| s.list_paired_devices())
                .await
                .map(CommandOutput::Devices),
            Command::Connect => {
                let address = request.string(0)?;
                self.session.connect(&address).await?;
                Ok(CommandOutput::Ack)
            }
            Command::Disconnect => {
                self.blocking(command, |s| s.disconnect()).await?;
                Ok(CommandOutput::Message("Printer disconnected"))
            }
            Command::FeedPaper => {
                let lines = request.int(0)?;
                self.blocking(command, move |s| s.feed_paper(lines)).await?;
                Ok(CommandOutput::Ack)
            }
            Command::PrintText => {
                let text = request.string(0)?;
                self.blocking(command, move |s| s.print_text(&text)).await?;
                Ok(CommandOutput::Ack)
            }
            Command::GetStatus => self
                .blocking(command, |s| s.get_status())
                .await
                .map(CommandOutput::Status),
            Command::GetTemperature => self
                .blocking(command, |s| s.get_temperature())
                .await
                .map(CommandOutput::Temperature),
            Command::ConfigureBarcode => {
                let align = request.int(0)?;
                let small = request.boolean(1)?;
                let scale = request.int(2)?;
                let hri = request.int(3)?;
                let height = request.int(4)?;
                self.blocking(command, move |s| {
                    s.configure_barcode(align, small, scale, hri, height)
                })
                .await?;
                Ok(CommandOutput::Ack)
            }
            Command::PrintBarcode => {
                let symbology = request.int(0)?;
                let data = request.string(1)?;
                self.blocking(command, move |s| s.print_barcode(symbology, &data))
                    .await?;
                Ok(CommandOutput::Ack)
            }
            Command::PrintImage => {
                let image = request.string(0)?;
                let width = request.int(1)?;
                let height = request.int(2)?;
                let align = request.int(3)?;
                self.blocking(command, move |s| s.print_image(&image, width, height, align))
                    .await?;
                Ok(CommandOutput::Ack)
            }
            Command::PrintLogo => {
                debug!("printLogo has no device behaviour, acknowledging");
                Ok(CommandOutput::Ack)
            }
            Command::PrintSelfTest => {
                self.blocking(command, |s| s.print_self_test()).await?;
                info!("Printer self test page requested");
                Ok(CommandOutput::Ack)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
