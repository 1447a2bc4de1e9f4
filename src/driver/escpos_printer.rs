//! Driver for ESC/POS-compatible Bluetooth printers.
//!
//! Handshake: reset, then a `DLE EOT 1` status probe. A printer that answers
//! is switched to automatic status back (`GS a`) and gets a
//! [`StatusBackChannel`] that turns unsolicited status frames into
//! [`DeviceEvent`]s. A silent printer is driven in raw mode without events.

use std::sync::MutexGuard;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::escpos::EscPosBuilder;
use super::raster;
use super::tagged_text;
use super::{
    Alignment, AttachedPrinter, BarcodeConfig, Charset, DeviceDriver, DeviceEvent, EventChannel,
    Printer, SharedTransport, Symbology,
};
use crate::bluetooth::PrinterTransport;
use crate::error::DriverError;

/// Dots across a 58 mm head.
pub const DEFAULT_MAX_WIDTH_DOTS: u32 = 384;

/// ASB mask: paper sensor + error status.
const ASB_MASK: u8 = 0x0C;

const EVENT_READ_TIMEOUT: Duration = Duration::from_millis(5);

fn lock(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn PrinterTransport>> {
    transport.lock().unwrap_or_else(|e| e.into_inner())
}

/// Response to `DLE EOT n`: bits 1 and 4 set, bits 0 and 7 clear.
fn is_status_byte(b: u8) -> bool {
    b & 0x93 == 0x12
}

/// First byte of an automatic status back frame: bit 4 set, bits 0, 1, 7 clear.
fn is_asb_header(b: u8) -> bool {
    b & 0x93 == 0x10
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct EscPosDriver {
    handshake_timeout: Duration,
    read_timeout: Duration,
    max_width_dots: u32,
}

impl EscPosDriver {
    pub fn new(handshake_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            read_timeout,
            max_width_dots: DEFAULT_MAX_WIDTH_DOTS,
        }
    }
}

impl DeviceDriver for EscPosDriver {
    fn name(&self) -> &str {
        "escpos"
    }

    fn attach(&self, transport: SharedTransport) -> Result<AttachedPrinter, DriverError> {
        let enhanced = {
            let mut t = lock(&transport);
            if !t.is_connected() {
                return Err(DriverError::NotConnected);
            }
            let mut probe = EscPosBuilder::new();
            probe.init().status_request(1);
            t.send(&probe.build())?;
            let reply = t.receive(self.handshake_timeout)?;
            let answered = reply.iter().any(|b| is_status_byte(*b));
            if answered {
                let mut asb = EscPosBuilder::new();
                asb.automatic_status_back(ASB_MASK);
                t.send(&asb.build())?;
            }
            answered
        };

        let printer = EscPosPrinter::new(transport.clone(), self.read_timeout, self.max_width_dots);
        if enhanced {
            info!("Printer answered status probe, event channel enabled");
            Ok(AttachedPrinter {
                printer: Box::new(printer),
                events: Some(Box::new(StatusBackChannel::new(transport))),
                protocol: "escpos+asb",
            })
        } else {
            info!("No status reply from printer, using raw mode");
            Ok(AttachedPrinter {
                printer: Box::new(printer),
                events: None,
                protocol: "escpos",
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

/// Buffers commands until [`Printer::flush`]; queries flush first.
pub struct EscPosPrinter {
    transport: SharedTransport,
    read_timeout: Duration,
    max_width_dots: u32,
    pending: Vec<u8>,
    barcode: BarcodeConfig,
    released: bool,
}

impl EscPosPrinter {
    pub fn new(transport: SharedTransport, read_timeout: Duration, max_width_dots: u32) -> Self {
        Self {
            transport,
            read_timeout,
            max_width_dots,
            pending: Vec::new(),
            barcode: BarcodeConfig::default(),
            released: false,
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.released {
            Err(DriverError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn push(&mut self, build: impl FnOnce(&mut EscPosBuilder)) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mut b = EscPosBuilder::new();
        build(&mut b);
        self.pending.extend(b.build());
        Ok(())
    }

    fn query_status_byte(&mut self) -> Result<u8, DriverError> {
        self.flush()?;
        let mut t = lock(&self.transport);
        let mut req = EscPosBuilder::new();
        req.status_request(1);
        t.send(&req.build())?;

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::NoResponse);
            }
            let chunk = t.receive(deadline - now)?;
            let mut i = 0;
            while i < chunk.len() {
                if is_status_byte(chunk[i]) {
                    return Ok(chunk[i]);
                }
                // unsolicited status frame, skip it
                i += if is_asb_header(chunk[i]) { 4 } else { 1 };
            }
        }
    }
}

impl Printer for EscPosPrinter {
    fn reset(&mut self) -> Result<(), DriverError> {
        self.push(|b| {
            b.init();
        })
    }

    fn feed_paper(&mut self, lines: u8) -> Result<(), DriverError> {
        self.push(|b| {
            b.feed(lines);
        })
    }

    fn print_tagged_text(&mut self, text: &str, charset: Charset) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mut b = EscPosBuilder::new().with_charset(charset);
        tagged_text::render(text, &mut b);
        self.pending.extend(b.build());
        Ok(())
    }

    fn get_status(&mut self) -> Result<i32, DriverError> {
        self.ensure_open()?;
        self.query_status_byte().map(i32::from)
    }

    fn get_temperature(&mut self) -> Result<i32, DriverError> {
        self.ensure_open()?;
        Err(DriverError::Unsupported("head temperature query"))
    }

    fn set_barcode(&mut self, config: &BarcodeConfig) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mut b = EscPosBuilder::new();
        b.barcode_setup(config);
        lock(&self.transport).send(&b.build())?;
        self.barcode = *config;
        Ok(())
    }

    fn print_barcode(&mut self, symbology: Symbology, data: &str) -> Result<(), DriverError> {
        if data.is_empty() || !data.is_ascii() {
            return Err(DriverError::InvalidParameter(format!(
                "barcode data {data:?}"
            )));
        }
        if data.len() > 255 {
            return Err(DriverError::InvalidParameter(format!(
                "barcode data is {} bytes",
                data.len()
            )));
        }
        let align = self.barcode.align;
        self.push(|b| {
            b.align(align)
                .barcode(symbology, data.as_bytes())
                .lf()
                .align(Alignment::Left);
        })
    }

    fn max_width_dots(&self) -> u32 {
        self.max_width_dots
    }

    fn print_image(
        &mut self,
        argb: &[u32],
        width: u32,
        height: u32,
        align: Alignment,
        dither: bool,
    ) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mono = if width > self.max_width_dots {
            debug!(width, max = self.max_width_dots, "Scaling image to head width");
            let source = raster::ArgbImage {
                width,
                height,
                pixels: argb.to_vec(),
            };
            if source.pixels.len() != (width as usize) * (height as usize) {
                return Err(DriverError::InvalidParameter(format!(
                    "image {width}x{height} with {} pixels",
                    argb.len()
                )));
            }
            let fitted = raster::resize(&source, self.max_width_dots, 0);
            raster::to_monochrome(&fitted.pixels, fitted.width, fitted.height, dither)?
        } else {
            raster::to_monochrome(argb, width, height, dither)?
        };
        self.push(|b| {
            b.align(align)
                .raster_image(mono.width_bytes, mono.height, &mono.data)
                .align(Alignment::Left);
        })
    }

    fn print_self_test(&mut self) -> Result<(), DriverError> {
        self.push(|b| {
            b.self_test();
        })
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.pending);
        lock(&self.transport).send(&data)?;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending.clear();
        let mut b = EscPosBuilder::new();
        b.automatic_status_back(0);
        let mut t = lock(&self.transport);
        if t.is_connected() {
            if let Err(e) = t.send(&b.build()) {
                debug!(error = %e, "Ignoring error while releasing printer");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

/// Decodes automatic status back frames into events, reporting changes only.
pub struct StatusBackChannel {
    transport: SharedTransport,
    buffer: Vec<u8>,
    paper_out: bool,
    overheated: bool,
}

impl StatusBackChannel {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
            paper_out: false,
            overheated: false,
        }
    }

    fn decode_frames(&mut self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        loop {
            match self.buffer.iter().position(|b| is_asb_header(*b)) {
                None => {
                    self.buffer.clear();
                    break;
                }
                Some(start) => {
                    self.buffer.drain(..start);
                }
            }
            if self.buffer.len() < 4 {
                break;
            }
            let frame: Vec<u8> = self.buffer.drain(..4).collect();
            // byte 2 bit 6: auto-recoverable error (head overheat)
            let overheated = frame[1] & 0x40 != 0;
            // byte 3 bits 2-3: paper end
            let paper_out = frame[2] & 0x0C != 0;
            if paper_out != self.paper_out {
                self.paper_out = paper_out;
                events.push(DeviceEvent::PaperReady(!paper_out));
            }
            if overheated != self.overheated {
                self.overheated = overheated;
                events.push(DeviceEvent::OverHeated(overheated));
            }
        }
        events
    }
}

impl EventChannel for StatusBackChannel {
    fn pull_event(&mut self) -> Result<Vec<DeviceEvent>, DriverError> {
        let chunk = {
            let mut t = lock(&self.transport);
            if !t.is_connected() {
                return Err(DriverError::NotConnected);
            }
            t.receive(EVENT_READ_TIMEOUT)?
        };
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        self.buffer.extend(chunk);
        Ok(self.decode_frames())
    }

    fn release(&mut self) {
        if !self.buffer.is_empty() {
            warn!(bytes = self.buffer.len(), "Dropping partial status frame");
        }
        self.buffer.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
