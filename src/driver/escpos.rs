//! ESC/POS binary command builder for Bluetooth thermal printers.
//!
//! Produces raw byte sequences written straight to the printer transport.
//! Covers text formatting, alignment, paper feed, barcodes, raster images
//! and the status commands used by the handshake and event channel.

use super::{Alignment, BarcodeConfig, Charset, Symbology};

// ESC/POS command bytes
pub const DLE: u8 = 0x10;
pub const EOT: u8 = 0x04;
pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const LF: u8 = 0x0A;

/// Builder for ESC/POS command buffers.
///
/// ```rust,ignore
/// let mut b = EscPosBuilder::new();
/// b.init().align(Alignment::Center).bold(true).text("RECEIPT\n").bold(false).feed(3);
/// let data = b.build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    charset: Charset,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            charset: Charset::Latin1,
        }
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    // -----------------------------------------------------------------------
    // Initialization / status
    // -----------------------------------------------------------------------

    /// ESC @: reset printer to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// DLE EOT n: real-time status request (n = 1..4).
    pub fn status_request(&mut self, n: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[DLE, EOT, n]);
        self
    }

    /// GS a n: enable/disable automatic status back.
    pub fn automatic_status_back(&mut self, mask: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x61, mask]);
        self
    }

    /// GS ( A: execute test print (self-test page).
    pub fn self_test(&mut self) -> &mut Self {
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x41, 0x02, 0x00, 0x00, 0x02]);
        self
    }

    // -----------------------------------------------------------------------
    // Text formatting
    // -----------------------------------------------------------------------

    /// ESC E n: bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x45, u8::from(on)]);
        self
    }

    /// ESC - n: underline (0=off, 1=thin, 2=thick).
    pub fn underline(&mut self, mode: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x2D, mode.min(2)]);
        self
    }

    /// ESC M n: font A (0) or the smaller font B (1).
    pub fn small_font(&mut self, on: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x4D, u8::from(on)]);
        self
    }

    /// GS ! n: text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    /// ESC a n: justification.
    pub fn align(&mut self, align: Alignment) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, align.code()]);
        self
    }

    // -----------------------------------------------------------------------
    // Text output
    // -----------------------------------------------------------------------

    /// Append text encoded in the builder's charset. Unmappable characters
    /// become `?`.
    pub fn text(&mut self, s: &str) -> &mut Self {
        let charset = self.charset;
        self.buffer.extend(encode_text(s, charset));
        self
    }

    /// Append raw bytes.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// ESC J n: feed n dot lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x4A, lines]);
        self
    }

    // -----------------------------------------------------------------------
    // Barcodes
    // -----------------------------------------------------------------------

    /// GS h / GS w / GS H / GS f: barcode height, module width, HRI
    /// position and HRI font.
    pub fn barcode_setup(&mut self, config: &BarcodeConfig) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x68, config.height]);
        self.buffer.extend_from_slice(&[GS, 0x77, config.scale]);
        self.buffer.extend_from_slice(&[GS, 0x48, config.hri.code()]);
        self.buffer
            .extend_from_slice(&[GS, 0x66, u8::from(config.narrow)]);
        self
    }

    /// GS k m n d1..dn: barcode in the length-prefixed form.
    pub fn barcode(&mut self, symbology: Symbology, data: &[u8]) -> &mut Self {
        let len = data.len().min(255);
        self.buffer
            .extend_from_slice(&[GS, 0x6B, symbology.code(), len as u8]);
        self.buffer.extend_from_slice(&data[..len]);
        self
    }

    // -----------------------------------------------------------------------
    // Raster image
    // -----------------------------------------------------------------------

    /// GS v 0: print a packed 1-bpp raster, `width_bytes` bytes per row.
    pub fn raster_image(&mut self, width_bytes: u16, height: u16, packed: &[u8]) -> &mut Self {
        let [xl, xh] = width_bytes.to_le_bytes();
        let [yl, yh] = height.to_le_bytes();
        self.buffer
            .extend_from_slice(&[GS, 0x76, 0x30, 0x00, xl, xh, yl, yh]);
        self.buffer.extend_from_slice(packed);
        self
    }

    /// Consume the builder and return the payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Text encoding
// ---------------------------------------------------------------------------

pub fn encode_text(text: &str, charset: Charset) -> Vec<u8> {
    let limit = match charset {
        Charset::Latin1 => 0xFF,
        Charset::Ascii => 0x7F,
    };
    text.chars()
        .map(|ch| {
            let code = ch as u32;
            if code <= limit {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
