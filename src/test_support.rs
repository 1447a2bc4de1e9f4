//! In-memory fakes for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bluetooth::adapter::{BluetoothAdapter, PairedDevice, DEVICE_TYPE_CLASSIC};
use crate::bluetooth::{PrinterTransport, TransportState};
use crate::driver::{
    Alignment, AttachedPrinter, BarcodeConfig, Charset, DeviceDriver, DeviceEvent, EventChannel,
    Printer, SharedTransport, Symbology, DEFAULT_MAX_WIDTH_DOTS,
};
use crate::error::{DriverError, TransportError};
use crate::notify::ConnectionNotifier;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Link {
    connected: bool,
    replies: VecDeque<Vec<u8>>,
    fail_reads: bool,
    fail_connect: bool,
    disconnects: usize,
}

/// Transport whose clones share one simulated link, so a test can keep a
/// handle after the original is boxed into the session.
#[derive(Clone, Default)]
pub struct FakeTransport {
    link: Arc<Mutex<Link>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeTransport {
    pub fn connected() -> Self {
        let t = Self::default();
        t.link.lock().unwrap().connected = true;
        t
    }

    /// Queue a chunk returned by the next `receive`.
    pub fn push_reply(&self, bytes: &[u8]) {
        self.link.lock().unwrap().replies.push_back(bytes.to_vec());
    }

    pub fn fail_reads(&self) {
        self.link.lock().unwrap().fail_reads = true;
    }

    pub fn fail_connect(&self) {
        self.link.lock().unwrap().fail_connect = true;
    }

    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.sent.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.link.lock().unwrap().disconnects
    }

    pub fn link_up(&self) -> bool {
        self.link.lock().unwrap().connected
    }
}

impl PrinterTransport for FakeTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        if link.fail_connect {
            return Err(TransportError::Open {
                target: "fake".into(),
                reason: "connection refused".into(),
            });
        }
        link.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        link.connected = false;
        link.disconnects += 1;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.link.lock().unwrap().connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let next = {
            let mut link = self.link.lock().unwrap();
            if link.fail_reads {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "link dropped",
                )));
            }
            if !link.connected {
                return Err(TransportError::NotConnected);
            }
            link.replies.pop_front()
        };
        match next {
            Some(bytes) => Ok(bytes),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(Vec::new())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.lock().unwrap().connected
    }

    fn state(&self) -> TransportState {
        if self.is_connected() {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    fn description(&self) -> String {
        "Fake".into()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct FakeAdapter {
    pub available: bool,
    pub devices: Vec<PairedDevice>,
    pub transport: FakeTransport,
    pub fail_open: bool,
    pub open_calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn with_printer(transport: FakeTransport) -> Self {
        Self {
            available: true,
            devices: vec![PairedDevice {
                device_type: DEVICE_TYPE_CLASSIC,
                address: "00:11:22:33:44:55".into(),
                name: "DPP-250".into(),
            }],
            transport,
            fail_open: false,
            open_calls: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

impl BluetoothAdapter for FakeAdapter {
    fn is_available(&self) -> bool {
        self.available
    }

    fn paired_devices(&self) -> Result<Vec<PairedDevice>, TransportError> {
        Ok(self.devices.clone())
    }

    fn open_socket(&self, address: &str) -> Result<Box<dyn PrinterTransport>, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(TransportError::UnknownDevice(address.to_string()));
        }
        Ok(Box::new(self.transport.clone()))
    }
}

// ---------------------------------------------------------------------------
// Scripted driver
// ---------------------------------------------------------------------------

/// Shared script and call record for [`ScriptedDriver`].
#[derive(Default)]
pub struct Script {
    pub calls: Mutex<Vec<String>>,
    pub fail_ops: AtomicBool,
    pub fail_attach: AtomicBool,
    pub status: AtomicI32,
    pub events: Mutex<VecDeque<DeviceEvent>>,
    /// Next `pull_event` fails once.
    pub link_lost: AtomicBool,
    /// Next `pull_event` reads an undecodable frame once.
    pub garbled: AtomicBool,
    /// Per-attach handshake delays, consumed in order.
    pub attach_delays: Mutex<VecDeque<Duration>>,
    pub releases: AtomicUsize,
}

impl Script {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), DriverError> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(DriverError::NoResponse);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

pub struct ScriptedDriver {
    pub script: Arc<Script>,
    pub with_events: bool,
}

impl ScriptedDriver {
    pub fn new(with_events: bool) -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        script.status.store(0x12, Ordering::SeqCst);
        (
            Self {
                script: script.clone(),
                with_events,
            },
            script,
        )
    }
}

impl DeviceDriver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn attach(&self, transport: SharedTransport) -> Result<AttachedPrinter, DriverError> {
        let delay = self.script.attach_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.script.fail_attach.load(Ordering::SeqCst) {
            return Err(DriverError::NoResponse);
        }
        if !transport.lock().unwrap().is_connected() {
            return Err(DriverError::NotConnected);
        }
        let events: Option<Box<dyn EventChannel>> = if self.with_events {
            Some(Box::new(ScriptedEvents {
                script: self.script.clone(),
            }))
        } else {
            None
        };
        Ok(AttachedPrinter {
            printer: Box::new(ScriptedPrinter {
                script: self.script.clone(),
            }),
            events,
            protocol: "scripted",
        })
    }
}

pub struct ScriptedPrinter {
    script: Arc<Script>,
}

impl Printer for ScriptedPrinter {
    fn reset(&mut self) -> Result<(), DriverError> {
        self.script.record("reset".into())
    }

    fn feed_paper(&mut self, lines: u8) -> Result<(), DriverError> {
        self.script.record(format!("feed:{lines}"))
    }

    fn print_tagged_text(&mut self, text: &str, _charset: Charset) -> Result<(), DriverError> {
        self.script.record(format!("text:{text}"))
    }

    fn get_status(&mut self) -> Result<i32, DriverError> {
        self.script.record("status".into())?;
        Ok(self.script.status.load(Ordering::SeqCst))
    }

    fn get_temperature(&mut self) -> Result<i32, DriverError> {
        self.script.record("temperature".into())?;
        Ok(38)
    }

    fn set_barcode(&mut self, config: &BarcodeConfig) -> Result<(), DriverError> {
        self.script
            .record(format!("barcode-config:{}:{}", config.scale, config.height))
    }

    fn print_barcode(&mut self, symbology: Symbology, data: &str) -> Result<(), DriverError> {
        self.script
            .record(format!("barcode:{}:{data}", symbology.code()))
    }

    fn max_width_dots(&self) -> u32 {
        DEFAULT_MAX_WIDTH_DOTS
    }

    fn print_image(
        &mut self,
        argb: &[u32],
        width: u32,
        height: u32,
        align: Alignment,
        _dither: bool,
    ) -> Result<(), DriverError> {
        assert_eq!(argb.len(), (width * height) as usize);
        self.script
            .record(format!("image:{width}x{height}:{}", align.code()))
    }

    fn print_self_test(&mut self) -> Result<(), DriverError> {
        self.script.record("self-test".into())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.script.record("flush".into())
    }

    fn release(&mut self) {
        self.script.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedEvents {
    script: Arc<Script>,
}

impl EventChannel for ScriptedEvents {
    fn pull_event(&mut self) -> Result<Vec<DeviceEvent>, DriverError> {
        if self.script.link_lost.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Transport(TransportError::Closed));
        }
        if self.script.garbled.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Decode("short status frame".into()));
        }
        Ok(self.script.events.lock().unwrap().drain(..).collect())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub connections: Mutex<Vec<bool>>,
    pub notices: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingNotifier {
    pub fn connections(&self) -> Vec<bool> {
        self.connections.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl ConnectionNotifier for RecordingNotifier {
    fn connection_changed(&self, connected: bool) {
        self.connections.lock().unwrap().push(connected);
    }

    fn notice(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }

    fn job_progress(&self, title: &str, message: &str, active: bool) {
        self.progress
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string(), active));
    }
}

/// PNG of `width` × `height` black pixels, base64 encoded.
pub fn black_png_base64(width: u32, height: u32) -> String {
    use base64::Engine as _;
    let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
        width,
        height,
        image::Luma([0]),
    ));
    let mut encoded = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut encoded),
        image::ImageFormat::Png,
    )
    .unwrap();
    base64::engine::general_purpose::STANDARD.encode(encoded)
}
