//! Device-driver seam.
//!
//! The session never speaks printer bytes itself: it talks to a [`Printer`]
//! obtained from a [`DeviceDriver`] after the transport is connected. The
//! driver's handshake decides whether an [`EventChannel`] for
//! device-initiated notifications is available.

pub mod escpos;
pub mod escpos_printer;
pub mod raster;
pub mod tagged_text;

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::bluetooth::PrinterTransport;
use crate::error::DriverError;

pub use escpos_printer::{EscPosDriver, DEFAULT_MAX_WIDTH_DOTS};

/// Transport shared between the printer handle, its event channel and the
/// session (which owns closing it).
pub type SharedTransport = Arc<Mutex<Box<dyn PrinterTransport>>>;

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn from_code(code: i64) -> Result<Self, DriverError> {
        match code {
            0 => Ok(Alignment::Left),
            1 => Ok(Alignment::Center),
            2 => Ok(Alignment::Right),
            other => Err(DriverError::InvalidParameter(format!("alignment {other}"))),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
        }
    }
}

/// Where the human-readable interpretation is printed relative to a barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HriPosition {
    #[default]
    None,
    Above,
    Below,
    Both,
}

impl HriPosition {
    pub fn from_code(code: i64) -> Result<Self, DriverError> {
        match code {
            0 => Ok(HriPosition::None),
            1 => Ok(HriPosition::Above),
            2 => Ok(HriPosition::Below),
            3 => Ok(HriPosition::Both),
            other => Err(DriverError::InvalidParameter(format!("HRI position {other}"))),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            HriPosition::None => 0,
            HriPosition::Above => 1,
            HriPosition::Below => 2,
            HriPosition::Both => 3,
        }
    }
}

/// Barcode symbologies, numbered as the app layer sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    UpcA,
    UpcE,
    Ean13,
    Ean8,
    Code39,
    Itf,
    Codabar,
    Code93,
    Code128,
}

impl Symbology {
    pub fn from_code(code: i64) -> Result<Self, DriverError> {
        Ok(match code {
            65 => Symbology::UpcA,
            66 => Symbology::UpcE,
            67 => Symbology::Ean13,
            68 => Symbology::Ean8,
            69 => Symbology::Code39,
            70 => Symbology::Itf,
            71 => Symbology::Codabar,
            72 => Symbology::Code93,
            73 => Symbology::Code128,
            other => {
                return Err(DriverError::InvalidParameter(format!(
                    "barcode symbology {other}"
                )))
            }
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Symbology::UpcA => 65,
            Symbology::UpcE => 66,
            Symbology::Ean13 => 67,
            Symbology::Ean8 => 68,
            Symbology::Code39 => 69,
            Symbology::Itf => 70,
            Symbology::Codabar => 71,
            Symbology::Code93 => 72,
            Symbology::Code128 => 73,
        }
    }
}

/// Rendering parameters applied to subsequent barcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarcodeConfig {
    pub align: Alignment,
    /// Use the narrow (small) HRI font.
    pub narrow: bool,
    /// Module width multiplier.
    pub scale: u8,
    pub hri: HriPosition,
    /// Bar height in dots.
    pub height: u8,
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            align: Alignment::Center,
            narrow: false,
            scale: 3,
            hri: HriPosition::Below,
            height: 100,
        }
    }
}

impl BarcodeConfig {
    pub fn from_codes(
        align: i64,
        narrow: bool,
        scale: i64,
        hri: i64,
        height: i64,
    ) -> Result<Self, DriverError> {
        let scale = u8::try_from(scale)
            .ok()
            .filter(|s| (1..=6).contains(s))
            .ok_or_else(|| DriverError::InvalidParameter(format!("barcode scale {scale}")))?;
        let height = u8::try_from(height)
            .ok()
            .filter(|h| *h >= 1)
            .ok_or_else(|| DriverError::InvalidParameter(format!("barcode height {height}")))?;
        Ok(Self {
            align: Alignment::from_code(align)?,
            narrow,
            scale,
            hri: HriPosition::from_code(hri)?,
            height,
        })
    }
}

/// Single-byte text encodings the printer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Latin1,
    Ascii,
}

impl Charset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Some(Charset::Latin1),
            "ASCII" | "US-ASCII" => Some(Charset::Ascii),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Device events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "state", rename_all = "camelCase")]
pub enum DeviceEvent {
    PaperReady(bool),
    OverHeated(bool),
    LowBattery(bool),
}

impl DeviceEvent {
    /// Short user-facing notice, `None` when the event is not worth showing.
    pub fn notice(self) -> Option<&'static str> {
        match self {
            DeviceEvent::PaperReady(true) => Some("Paper ok"),
            DeviceEvent::PaperReady(false) => Some("Out of paper"),
            DeviceEvent::OverHeated(true) => Some("Print head overheated"),
            DeviceEvent::LowBattery(true) => Some("Low battery"),
            DeviceEvent::OverHeated(false) | DeviceEvent::LowBattery(false) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver traits
// ---------------------------------------------------------------------------

/// Printer handle. Calls block until the device has taken the data.
pub trait Printer: Send {
    fn reset(&mut self) -> Result<(), DriverError>;

    fn feed_paper(&mut self, lines: u8) -> Result<(), DriverError>;

    /// Print text containing inline `{tag}` formatting directives.
    fn print_tagged_text(&mut self, text: &str, charset: Charset) -> Result<(), DriverError>;

    fn get_status(&mut self) -> Result<i32, DriverError>;

    fn get_temperature(&mut self) -> Result<i32, DriverError>;

    fn set_barcode(&mut self, config: &BarcodeConfig) -> Result<(), DriverError>;

    fn print_barcode(&mut self, symbology: Symbology, data: &str) -> Result<(), DriverError>;

    /// Printable width of the head in dots.
    fn max_width_dots(&self) -> u32;

    /// Print `width * height` ARGB pixels, row-major.
    fn print_image(
        &mut self,
        argb: &[u32],
        width: u32,
        height: u32,
        align: Alignment,
        dither: bool,
    ) -> Result<(), DriverError>;

    fn print_self_test(&mut self) -> Result<(), DriverError>;

    fn flush(&mut self) -> Result<(), DriverError>;

    /// Drop device-side state. Never fails; errors are logged.
    fn release(&mut self);
}

/// Source of device-initiated notifications.
pub trait EventChannel: Send {
    /// Drain pending events without blocking for long. An `Err` means the
    /// link is gone.
    fn pull_event(&mut self) -> Result<Vec<DeviceEvent>, DriverError>;

    /// Detach from the device. Never fails.
    fn release(&mut self) {}
}

/// Result of a successful protocol handshake.
pub struct AttachedPrinter {
    pub printer: Box<dyn Printer>,
    /// Present when the device supports the multi-channel protocol.
    pub events: Option<Box<dyn EventChannel>>,
    pub protocol: &'static str,
}

/// Binds a printer protocol to a connected transport.
pub trait DeviceDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Perform the handshake on an already connected transport.
    fn attach(&self, transport: SharedTransport) -> Result<AttachedPrinter, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_codes() {
        assert_eq!(Alignment::from_code(1).unwrap(), Alignment::Center);
        assert_eq!(Alignment::Right.code(), 2);
        assert!(Alignment::from_code(3).is_err());
    }

    #[test]
    fn test_symbology_range() {
        assert_eq!(Symbology::from_code(67).unwrap(), Symbology::Ean13);
        assert_eq!(Symbology::Code128.code(), 73);
        assert!(Symbology::from_code(64).is_err());
        assert!(Symbology::from_code(74).is_err());
    }

    #[test]
    fn test_barcode_config_validation() {
        let c = BarcodeConfig::from_codes(1, true, 2, 2, 80).unwrap();
        assert_eq!(c.align, Alignment::Center);
        assert!(c.narrow);
        assert_eq!(c.hri, HriPosition::Below);
        assert!(BarcodeConfig::from_codes(0, false, 0, 0, 80).is_err());
        assert!(BarcodeConfig::from_codes(0, false, 2, 0, 0).is_err());
        assert!(BarcodeConfig::from_codes(0, false, 2, 0, 256).is_err());
        assert!(BarcodeConfig::from_codes(0, false, 2, 4, 80).is_err());
    }

    #[test]
    fn test_charset_names() {
        assert_eq!(Charset::from_name("iso-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::from_name("us-ascii"), Some(Charset::Ascii));
        assert_eq!(Charset::from_name("UTF-8"), None);
    }

    #[test]
    fn test_event_notices() {
        assert_eq!(DeviceEvent::PaperReady(false).notice(), Some("Out of paper"));
        assert_eq!(DeviceEvent::OverHeated(false).notice(), None);
        let json = serde_json::to_value(DeviceEvent::LowBattery(true)).unwrap();
        assert_eq!(json["event"], "lowBattery");
        assert_eq!(json["state"], true);
    }
}
