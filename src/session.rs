//! Printer session: the single active Bluetooth connection and every
//! operation issued against it.
//!
//! Lifecycle: `Disconnected → Connecting → Connected`, with `Faulted` as the
//! transient state between a failure and the release of resources. At most
//! one connection exists. Teardown (printer handle first, then socket) runs
//! under the session lock, so device operations never observe a half-closed
//! connection.
//!
//! Teardown, socket open, protocol handshake and event reads run on the
//! blocking pool. When the driver provides an event channel, a background
//! task drains it at a fixed interval; its first link failure tears the
//! connection down and, if configured, reconnects to the last address.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bluetooth::{is_valid_address, BluetoothAdapter, PairedDevice};
use crate::config::BridgeConfig;
use crate::driver::{
    raster, Alignment, AttachedPrinter, BarcodeConfig, Charset, DeviceDriver, DeviceEvent,
    EventChannel, Printer, SharedTransport, Symbology,
};
use crate::error::{CommandError, DriverError, ErrorCode, TransportError};
use crate::notify::ConnectionNotifier;

const PROGRESS_TITLE: &str = "Printer";
const PROGRESS_MESSAGE: &str = "Connecting...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

/// Read-only view for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub is_connected: bool,
    pub address: Option<String>,
    pub protocol: Option<String>,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    id: Uuid,
    generation: u64,
    address: String,
    transport: SharedTransport,
    printer: Box<dyn Printer>,
    protocol: &'static str,
    poller: Option<CancellationToken>,
}

/// Socket + handshake result, produced off the async runtime.
struct Link {
    transport: SharedTransport,
    attached: AttachedPrinter,
    description: String,
}

struct Inner {
    state: SessionState,
    connection: Option<Connection>,
    last_address: Option<String>,
    /// Bumped by every connect and disconnect; a connect attempt whose
    /// generation is stale when its handshake completes is discarded.
    generation: u64,
}

fn lock_transport(
    transport: &SharedTransport,
) -> MutexGuard<'_, Box<dyn crate::bluetooth::PrinterTransport>> {
    transport.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct PrinterSession {
    adapter: Arc<dyn BluetoothAdapter>,
    driver: Arc<dyn DeviceDriver>,
    notifier: Arc<dyn ConnectionNotifier>,
    config: BridgeConfig,
    charset: Charset,
    inner: Mutex<Inner>,
}

impl PrinterSession {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        driver: Arc<dyn DeviceDriver>,
        notifier: Arc<dyn ConnectionNotifier>,
        config: BridgeConfig,
    ) -> Self {
        let charset = Charset::from_name(&config.text_charset).unwrap_or_else(|| {
            warn!(charset = %config.text_charset, "Unknown text charset, using ISO-8859-1");
            Charset::Latin1
        });
        Self {
            adapter,
            driver,
            notifier,
            config,
            charset,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                connection: None,
                last_address: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            state: inner.state,
            is_connected: inner.connection.is_some(),
            address: inner.connection.as_ref().map(|c| c.address.clone()),
            protocol: inner.connection.as_ref().map(|c| c.protocol.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    pub fn list_paired_devices(&self) -> Result<Vec<PairedDevice>, CommandError> {
        if !self.adapter.is_available() {
            return Err(CommandError::new(ErrorCode::AdapterUnavailable));
        }
        let devices = self
            .adapter
            .paired_devices()
            .map_err(|e| CommandError::with_cause(ErrorCode::AdapterUnavailable, e))?;
        if devices.is_empty() {
            return Err(CommandError::new(ErrorCode::NoDevices));
        }
        debug!(count = devices.len(), "Listed paired devices");
        Ok(devices)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Replace any current connection with one to `address`.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<(), CommandError> {
        if !is_valid_address(address) {
            warn!(address = %address, "Rejected connect to invalid address");
            return Err(CommandError::with_cause(ErrorCode::InvalidAddress, address));
        }

        let this = Arc::clone(self);
        let target = address.to_string();
        let generation = tokio::task::spawn_blocking(move || this.begin_connect(&target))
            .await
            .map_err(|e| CommandError::with_cause(ErrorCode::ConnectFailed, e))?;

        let id = Uuid::new_v4();
        info!(address = %address, connection = %id, "Connecting to printer");

        let this = Arc::clone(self);
        let target = address.to_string();
        tokio::task::spawn_blocking(move || this.open_and_install(&target, generation, id))
            .await
            .unwrap_or_else(|e| {
                self.fail_connect(generation);
                Err(CommandError::with_cause(ErrorCode::ConnectFailed, e))
            })
    }

    /// Tear down the current connection and claim a new generation for the
    /// attempt on `address`.
    fn begin_connect(&self, address: &str) -> u64 {
        let (had_connection, generation) = {
            let mut inner = self.lock();
            let closed = self.close_locked(&mut inner);
            if let Some(Err(ref e)) = closed {
                warn!(error = %e, "Error closing previous printer connection");
            }
            inner.generation += 1;
            inner.state = SessionState::Connecting;
            inner.last_address = Some(address.to_string());
            (closed.is_some(), inner.generation)
        };
        if had_connection {
            self.notifier.connection_changed(false);
        }
        generation
    }

    fn open_and_install(
        self: &Arc<Self>,
        address: &str,
        generation: u64,
        id: Uuid,
    ) -> Result<(), CommandError> {
        self.notifier
            .job_progress(PROGRESS_TITLE, PROGRESS_MESSAGE, true);
        let opened = self.open_link(address);
        self.notifier
            .job_progress(PROGRESS_TITLE, PROGRESS_MESSAGE, false);

        match opened {
            Ok(link) => self.install(link, address, generation, id),
            Err(err) => {
                error!(address = %address, connection = %id, error = %err, "Printer connection failed");
                self.fail_connect(generation);
                Err(err)
            }
        }
    }

    /// Blocking part of connect: socket, settle delay, connect, handshake.
    fn open_link(&self, address: &str) -> Result<Link, CommandError> {
        let connect_failed = |e: &dyn std::fmt::Display| {
            CommandError::with_cause(ErrorCode::ConnectFailed, e)
        };
        if !self.adapter.is_available() {
            return Err(connect_failed(&ErrorCode::AdapterUnavailable.message()));
        }
        let mut transport = self
            .adapter
            .open_socket(address)
            .map_err(|e| connect_failed(&e))?;
        std::thread::sleep(self.config.settle_delay());
        transport.connect().map_err(|e| connect_failed(&e))?;

        let description = transport.description();
        debug!(transport = %description, state = ?transport.state(), "Printer socket open");
        let shared: SharedTransport = Arc::new(Mutex::new(transport));
        match self.driver.attach(shared.clone()) {
            Ok(attached) => Ok(Link {
                transport: shared,
                attached,
                description,
            }),
            Err(e) => {
                if let Err(close_err) = lock_transport(&shared).disconnect() {
                    debug!(error = %close_err, "Error closing socket after failed handshake");
                }
                Err(connect_failed(&e))
            }
        }
    }

    fn install(
        self: &Arc<Self>,
        link: Link,
        address: &str,
        generation: u64,
        id: Uuid,
    ) -> Result<(), CommandError> {
        let Link {
            transport,
            attached,
            description,
        } = link;
        let AttachedPrinter {
            mut printer,
            events,
            protocol,
        } = attached;

        let mut inner = self.lock();
        if inner.generation != generation {
            drop(inner);
            info!(connection = %id, "Connect attempt superseded, dropping link");
            printer.release();
            if let Some(mut events) = events {
                events.release();
            }
            if let Err(e) = lock_transport(&transport).disconnect() {
                debug!(error = %e, "Error closing superseded socket");
            }
            return Err(CommandError::with_cause(
                ErrorCode::ConnectFailed,
                "connection attempt superseded",
            ));
        }

        let poller = events.map(|channel| self.spawn_poller(generation, channel));
        let polling = poller.is_some();
        inner.connection = Some(Connection {
            id,
            generation,
            address: address.to_string(),
            transport,
            printer,
            protocol,
            poller,
        });
        inner.state = SessionState::Connected;
        drop(inner);

        info!(
            address = %address,
            connection = %id,
            driver = self.driver.name(),
            protocol,
            transport = %description,
            events = polling,
            "Printer connected"
        );
        self.notifier.connection_changed(true);
        Ok(())
    }

    fn fail_connect(&self, generation: u64) {
        let current = {
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.state = SessionState::Faulted;
                // open_link already closed whatever it opened
                inner.state = SessionState::Disconnected;
                true
            } else {
                false
            }
        };
        if current {
            self.notifier.connection_changed(false);
        }
    }

    /// Close the current connection if there is one. Returns `None` when
    /// nothing was open, otherwise the socket close result.
    fn close_locked(&self, inner: &mut Inner) -> Option<Result<(), TransportError>> {
        let mut conn = inner.connection.take()?;
        if let Some(token) = conn.poller.take() {
            token.cancel();
        }
        conn.printer.release();
        std::thread::sleep(self.config.settle_delay());
        let result = lock_transport(&conn.transport).disconnect();
        inner.state = SessionState::Disconnected;
        info!(address = %conn.address, connection = %conn.id, "Printer connection closed");
        Some(result)
    }

    /// Close the connection. Succeeds when nothing is connected; socket
    /// close errors are logged, not returned.
    pub fn disconnect(&self) -> Result<(), CommandError> {
        let closed = {
            let mut inner = self.lock();
            inner.generation += 1;
            let closed = self.close_locked(&mut inner);
            inner.state = SessionState::Disconnected;
            closed
        };
        match closed {
            None => debug!("Disconnect requested with no active connection"),
            Some(result) => {
                if let Err(e) = result {
                    warn!(error = %e, "Error closing printer socket");
                }
                self.notifier.connection_changed(false);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event poller
    // -----------------------------------------------------------------------

    fn spawn_poller(
        self: &Arc<Self>,
        generation: u64,
        events: Box<dyn EventChannel>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        tokio::spawn(poll_events(
            Arc::downgrade(self),
            generation,
            events,
            token.clone(),
            self.config.poll_interval(),
        ));
        token
    }

    fn on_device_event(&self, event: DeviceEvent) {
        info!(event = ?event, "Printer event");
        if let Some(message) = event.notice() {
            self.notifier.notice(message);
        }
    }

    /// The event channel of connection `generation` failed.
    async fn link_lost(self: &Arc<Self>, generation: u64, cause: DriverError) {
        let this = Arc::clone(self);
        let address = match tokio::task::spawn_blocking(move || this.close_lost(generation)).await
        {
            Ok(Some(address)) => address,
            Ok(None) => return,
            Err(e) => {
                error!(generation, error = %e, "Printer teardown task failed");
                return;
            }
        };

        error!(address = %address, error = %cause, "Printer connection lost");
        self.notifier.connection_changed(false);
        self.notifier.notice(&format!("Connection lost: {cause}"));

        if self.config.auto_reconnect {
            info!(address = %address, "Reconnecting to printer");
            if let Err(e) = self.connect(&address).await {
                warn!(address = %address, error = %e, "Printer reconnect failed");
            }
        }
    }

    /// Close connection `generation` if it is still the current one and
    /// return its address.
    fn close_lost(&self, generation: u64) -> Option<String> {
        let mut inner = self.lock();
        let address = inner
            .connection
            .as_ref()
            .filter(|c| c.generation == generation)
            .map(|c| c.address.clone())?;
        inner.state = SessionState::Faulted;
        if let Some(Err(e)) = self.close_locked(&mut inner) {
            warn!(error = %e, "Error closing lost printer connection");
        }
        Some(address)
    }

    // -----------------------------------------------------------------------
    // Device operations
    // -----------------------------------------------------------------------

    fn with_printer<T>(
        &self,
        code: ErrorCode,
        op: &str,
        f: impl FnOnce(&mut dyn Printer) -> Result<T, DriverError>,
    ) -> Result<T, CommandError> {
        let mut inner = self.lock();
        let conn = inner
            .connection
            .as_mut()
            .ok_or_else(|| CommandError::with_cause(code, DriverError::NotConnected))?;
        f(conn.printer.as_mut()).map_err(|e| {
            warn!(op, connection = %conn.id, error = %e, "Printer operation failed");
            CommandError::with_cause(code, e)
        })
    }

    pub fn feed_paper(&self, lines: i64) -> Result<(), CommandError> {
        let lines = u8::try_from(lines)
            .map_err(|_| CommandError::with_cause(ErrorCode::InvalidLineCount, lines))?;
        self.with_printer(ErrorCode::FeedFailed, "feed_paper", |p| {
            p.feed_paper(lines)?;
            p.flush()
        })
    }

    pub fn print_text(&self, text: &str) -> Result<(), CommandError> {
        let feed = self.config.text_feed_lines;
        let charset = self.charset;
        self.with_printer(ErrorCode::PrintFailed, "print_text", |p| {
            p.reset()?;
            p.print_tagged_text(text, charset)?;
            p.feed_paper(feed)?;
            p.flush()
        })
    }

    pub fn get_status(&self) -> Result<i32, CommandError> {
        self.with_printer(ErrorCode::StatusFailed, "get_status", |p| p.get_status())
    }

    pub fn get_temperature(&self) -> Result<i32, CommandError> {
        self.with_printer(ErrorCode::TemperatureFailed, "get_temperature", |p| {
            p.get_temperature()
        })
    }

    pub fn configure_barcode(
        &self,
        align: i64,
        small: bool,
        scale: i64,
        hri: i64,
        height: i64,
    ) -> Result<(), CommandError> {
        let config = BarcodeConfig::from_codes(align, small, scale, hri, height)
            .map_err(|e| CommandError::with_cause(ErrorCode::BarcodeConfigFailed, e))?;
        self.with_printer(ErrorCode::BarcodeConfigFailed, "set_barcode", |p| {
            p.set_barcode(&config)
        })
    }

    pub fn print_barcode(&self, symbology: i64, data: &str) -> Result<(), CommandError> {
        let symbology = Symbology::from_code(symbology)
            .map_err(|e| CommandError::with_cause(ErrorCode::BarcodePrintFailed, e))?;
        self.with_printer(ErrorCode::BarcodePrintFailed, "print_barcode", |p| {
            p.print_barcode(symbology, data)?;
            p.flush()
        })
    }

    /// Decode a base64 image, scale it when a target size is given and print
    /// it dithered. Targets must fit the head width and the raster height.
    pub fn print_image(
        &self,
        payload: &str,
        width: i64,
        height: i64,
        align: i64,
    ) -> Result<(), CommandError> {
        let failed = |e: DriverError| CommandError::with_cause(ErrorCode::ImagePrintFailed, e);
        let align = Alignment::from_code(align).map_err(failed)?;
        let target_w = u32::try_from(width)
            .map_err(|_| failed(DriverError::InvalidParameter(format!("image width {width}"))))?;
        let target_h = u32::try_from(height).map_err(|_| {
            failed(DriverError::InvalidParameter(format!("image height {height}")))
        })?;

        let max_width = self.with_printer(ErrorCode::ImagePrintFailed, "print_image", |p| {
            Ok(p.max_width_dots())
        })?;

        let decoded = raster::decode_image(payload).map_err(failed)?;
        let (fit_w, fit_h) =
            raster::fit_size(decoded.width, decoded.height, target_w, target_h, max_width)
                .map_err(failed)?;
        let image = raster::resize(&decoded, fit_w, fit_h);
        debug!(
            source_w = decoded.width,
            source_h = decoded.height,
            width = image.width,
            height = image.height,
            "Image prepared for printing"
        );
        self.with_printer(ErrorCode::ImagePrintFailed, "print_image", |p| {
            p.print_image(&image.pixels, image.width, image.height, align, true)?;
            p.flush()
        })
    }

    pub fn print_self_test(&self) -> Result<(), CommandError> {
        self.with_printer(ErrorCode::SelfTestFailed, "print_self_test", |p| {
            p.print_self_test()?;
            p.flush()
        })
    }

    /// Close everything on app exit.
    pub fn shutdown(&self) {
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "Error closing printer during shutdown");
        }
        let last = self.lock().last_address.take();
        info!(last_address = ?last, "Printer session shut down");
    }
}

/// Drain device events until cancelled or the channel fails.
async fn poll_events(
    session: Weak<PrinterSession>,
    generation: u64,
    mut events: Box<dyn EventChannel>,
    token: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(generation, "Printer event poller started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let pulled = tokio::task::spawn_blocking(move || {
            let batch = events.pull_event();
            (events, batch)
        })
        .await;
        let batch = match pulled {
            Ok((channel, batch)) => {
                events = channel;
                batch
            }
            Err(e) => {
                error!(generation, error = %e, "Printer event read task failed");
                return;
            }
        };
        match batch {
            Ok(batch) => {
                let Some(session) = session.upgrade() else {
                    break;
                };
                for event in batch {
                    session.on_device_event(event);
                }
            }
            Err(e) if !e.is_io() => {
                warn!(generation, error = %e, "Skipping unreadable printer event");
            }
            Err(e) => {
                events.release();
                if let Some(session) = session.upgrade() {
                    session.link_lost(generation, e).await;
                }
                debug!(generation, "Printer event poller stopped after link failure");
                return;
            }
        }
    }

    events.release();
    debug!(generation, "Printer event poller stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        black_png_base64, FakeAdapter, FakeTransport, RecordingNotifier, Script, ScriptedDriver,
    };
    use std::sync::atomic::Ordering;

    const ADDR: &str = "00:11:22:33:44:55";

    struct Harness {
        session: Arc<PrinterSession>,
        adapter: Arc<FakeAdapter>,
        transport: FakeTransport,
        script: Arc<Script>,
        notifier: Arc<RecordingNotifier>,
    }

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            settle_delay_ms: 0,
            poll_interval_ms: 5,
            ..BridgeConfig::default()
        }
    }

    fn harness_with(
        config: BridgeConfig,
        with_events: bool,
        tweak: impl FnOnce(&mut FakeAdapter),
    ) -> Harness {
        let transport = FakeTransport::default();
        let mut adapter = FakeAdapter::with_printer(transport.clone());
        tweak(&mut adapter);
        let adapter = Arc::new(adapter);
        let (driver, script) = ScriptedDriver::new(with_events);
        let notifier = Arc::new(RecordingNotifier::default());
        let session = Arc::new(PrinterSession::new(
            adapter.clone(),
            Arc::new(driver),
            notifier.clone(),
            config,
        ));
        Harness {
            session,
            adapter,
            transport,
            script,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), false, |_| {})
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_emits_single_connected_notification() {
        let h = harness();
        assert_eq!(h.session.state(), SessionState::Disconnected);
        h.session.connect(ADDR).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Connected);
        assert_eq!(h.notifier.connections(), vec![true]);
        assert!(h.transport.link_up());
        let progress = h.notifier.progress.lock().unwrap().clone();
        assert_eq!(
            progress,
            vec![
                ("Printer".to_string(), "Connecting...".to_string(), true),
                ("Printer".to_string(), "Connecting...".to_string(), false),
            ]
        );
        let snap = h.session.snapshot();
        assert!(snap.is_connected);
        assert_eq!(snap.address.as_deref(), Some(ADDR));
        assert_eq!(snap.protocol.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn test_invalid_address_touches_nothing() {
        let h = harness();
        for bad in ["00:11:22:33:44", "00:11:22:33:44:5G", "aa:bb:cc:dd:ee:ff", ""] {
            let err = h.session.connect(bad).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidAddress);
        }
        assert_eq!(h.adapter.opens(), 0);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.notifier.connections().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_keeps_existing_connection() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        assert!(h.session.connect("bogus").await.is_err());
        assert_eq!(h.session.state(), SessionState::Connected);
        assert_eq!(h.adapter.opens(), 1);
        assert_eq!(h.notifier.connections(), vec![true]);
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_previous_connection() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        h.session.connect(ADDR).await.unwrap();
        assert_eq!(h.notifier.connections(), vec![true, false, true]);
        assert_eq!(h.script.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_discards_link() {
        let h = harness();
        h.script
            .attach_delays
            .lock()
            .unwrap()
            .push_back(Duration::from_millis(150));
        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.connect(ADDR).await });
        let script = h.script.clone();
        wait_for(|| script.attach_delays.lock().unwrap().is_empty()).await;
        assert_eq!(h.session.state(), SessionState::Connecting);

        h.session.disconnect().unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailed);
        assert_eq!(
            err.exception.as_deref(),
            Some("connection attempt superseded")
        );
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(!h.session.snapshot().is_connected);
        assert_eq!(h.transport.disconnects(), 1);
        assert!(!h.transport.link_up());
        assert_eq!(h.script.releases.load(Ordering::SeqCst), 1);
        assert!(h.notifier.connections().is_empty());
    }

    #[tokio::test]
    async fn test_newer_connect_supersedes_pending_one() {
        let h = harness();
        h.script
            .attach_delays
            .lock()
            .unwrap()
            .push_back(Duration::from_millis(150));
        let session = h.session.clone();
        let first = tokio::spawn(async move { session.connect(ADDR).await });
        let script = h.script.clone();
        wait_for(|| script.attach_delays.lock().unwrap().is_empty()).await;

        h.session.connect(ADDR).await.unwrap();
        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailed);
        assert_eq!(
            err.exception.as_deref(),
            Some("connection attempt superseded")
        );
        assert_eq!(h.session.state(), SessionState::Connected);
        assert!(h.session.snapshot().is_connected);
        assert_eq!(h.adapter.opens(), 2);
        // only the stale socket was closed
        assert_eq!(h.transport.disconnects(), 1);
        assert_eq!(h.script.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.connections(), vec![true]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = harness();
        h.session.disconnect().unwrap();
        assert!(h.notifier.connections().is_empty());

        h.session.connect(ADDR).await.unwrap();
        h.session.disconnect().unwrap();
        h.session.disconnect().unwrap();
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.notifier.connections(), vec![true, false]);
        assert_eq!(h.script.releases.load(Ordering::SeqCst), 1);
        assert!(!h.transport.link_up());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_code_13() {
        let h = harness_with(test_config(), false, |a| a.fail_open = true);
        let err = h.session.connect(ADDR).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailed);
        assert!(err.exception.is_some());
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.notifier.connections(), vec![false]);
    }

    #[tokio::test]
    async fn test_refused_socket_reports_cause() {
        let h = harness();
        h.transport.fail_connect();
        let err = h.session.connect(ADDR).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailed);
        assert!(err.exception.unwrap().contains("connection refused"));
        assert_eq!(h.adapter.opens(), 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_socket() {
        let h = harness();
        h.script.fail_attach.store(true, Ordering::SeqCst);
        let err = h.session.connect(ADDR).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailed);
        assert!(!h.transport.link_up());
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_list_devices_codes() {
        let h = harness();
        assert_eq!(h.session.list_paired_devices().unwrap().len(), 1);

        let empty = harness_with(test_config(), false, |a| a.devices.clear());
        let err = empty.session.list_paired_devices().unwrap_err();
        assert_eq!(err.code, ErrorCode::NoDevices);

        let off = harness_with(test_config(), false, |a| a.available = false);
        let err = off.session.list_paired_devices().unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterUnavailable);
    }

    #[test]
    fn test_operations_while_disconnected() {
        let h = harness();
        let cases: Vec<(ErrorCode, Result<(), CommandError>)> = vec![
            (ErrorCode::FeedFailed, h.session.feed_paper(10)),
            (ErrorCode::PrintFailed, h.session.print_text("hi")),
            (ErrorCode::StatusFailed, h.session.get_status().map(|_| ())),
            (
                ErrorCode::TemperatureFailed,
                h.session.get_temperature().map(|_| ()),
            ),
            (ErrorCode::BarcodePrintFailed, h.session.print_barcode(67, "1")),
            (ErrorCode::SelfTestFailed, h.session.print_self_test()),
        ];
        for (code, result) in cases {
            let err = result.unwrap_err();
            assert_eq!(err.code, code);
            assert_eq!(err.exception.as_deref(), Some("printer not connected"));
        }
    }

    #[tokio::test]
    async fn test_feed_range_checked_before_io() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        for lines in [300, 256, -1] {
            let err = h.session.feed_paper(lines).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidLineCount);
        }
        assert!(h.script.calls().is_empty());
        h.session.feed_paper(255).unwrap();
        assert_eq!(h.script.calls(), vec!["feed:255", "flush"]);
    }

    #[tokio::test]
    async fn test_print_text_sequence() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        h.session.print_text("{b}Total{/b}").unwrap();
        assert_eq!(
            h.script.calls(),
            vec!["reset", "text:{b}Total{/b}", "feed:110", "flush"]
        );
    }

    #[tokio::test]
    async fn test_status_and_temperature() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        assert_eq!(h.session.get_status().unwrap(), 0x12);
        assert_eq!(h.session.get_temperature().unwrap(), 38);

        h.script.fail_ops.store(true, Ordering::SeqCst);
        let err = h.session.get_status().unwrap_err();
        assert_eq!(err.code, ErrorCode::StatusFailed);
        assert_eq!(err.exception.as_deref(), Some("no response from printer"));
    }

    #[tokio::test]
    async fn test_barcode_configuration_and_print() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        let err = h.session.configure_barcode(1, false, 9, 2, 80).unwrap_err();
        assert_eq!(err.code, ErrorCode::BarcodeConfigFailed);
        assert!(h.script.calls().is_empty());

        h.session.configure_barcode(1, false, 2, 2, 80).unwrap();
        h.session.print_barcode(67, "590123412345").unwrap();
        assert_eq!(
            h.script.calls(),
            vec!["barcode-config:2:80", "barcode:67:590123412345", "flush"]
        );
        let err = h.session.print_barcode(12, "x").unwrap_err();
        assert_eq!(err.code, ErrorCode::BarcodePrintFailed);
    }

    #[tokio::test]
    async fn test_print_image_decode_failure() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        let err = h.session.print_image("this is not base64!", 0, 0, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::ImagePrintFailed);
        assert!(err.exception.unwrap().contains("base64"));
        assert!(h.script.calls().is_empty());
    }

    #[tokio::test]
    async fn test_print_image_resizes() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        let png = black_png_base64(4, 2);
        h.session.print_image(&png, 8, 0, 1).unwrap();
        h.session.print_image(&png, 0, 0, 2).unwrap();
        assert_eq!(
            h.script.calls(),
            vec!["image:8x4:1", "flush", "image:4x2:2", "flush"]
        );
        let err = h.session.print_image(&png, 0, 0, 5).unwrap_err();
        assert_eq!(err.code, ErrorCode::ImagePrintFailed);
    }

    #[tokio::test]
    async fn test_print_image_rejects_oversized_target() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        let png = black_png_base64(1, 1);
        for (width, height) in [(60_000, 0), (385, 0), (0, 70_000), (10, 70_000)] {
            let err = h.session.print_image(&png, width, height, 0).unwrap_err();
            assert_eq!(err.code, ErrorCode::ImagePrintFailed);
            assert!(err.exception.unwrap().contains("exceeds"));
        }
        assert!(h.script.calls().is_empty());

        h.session.print_image(&png, 384, 0, 0).unwrap();
        assert_eq!(h.script.calls(), vec!["image:384x384:0", "flush"]);
    }

    #[test]
    fn test_print_image_checks_connection_before_decoding() {
        let h = harness();
        let err = h.session.print_image("this is not base64!", 0, 0, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::ImagePrintFailed);
        assert_eq!(err.exception.as_deref(), Some("printer not connected"));
    }

    #[tokio::test]
    async fn test_self_test() {
        let h = harness();
        h.session.connect(ADDR).await.unwrap();
        h.session.print_self_test().unwrap();
        assert_eq!(h.script.calls(), vec!["self-test", "flush"]);
    }

    #[tokio::test]
    async fn test_device_events_reach_notice_hook() {
        let h = harness_with(test_config(), true, |_| {});
        h.session.connect(ADDR).await.unwrap();
        h.script
            .events
            .lock()
            .unwrap()
            .push_back(DeviceEvent::PaperReady(false));
        let notifier = h.notifier.clone();
        wait_for(|| notifier.notices().contains(&"Out of paper".to_string())).await;
        assert_eq!(h.session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_unreadable_event_keeps_connection() {
        let h = harness_with(test_config(), true, |_| {});
        h.session.connect(ADDR).await.unwrap();
        h.script.garbled.store(true, Ordering::SeqCst);
        let script = h.script.clone();
        wait_for(|| !script.garbled.load(Ordering::SeqCst)).await;

        h.script
            .events
            .lock()
            .unwrap()
            .push_back(DeviceEvent::PaperReady(false));
        let notifier = h.notifier.clone();
        wait_for(|| notifier.notices().contains(&"Out of paper".to_string())).await;
        assert_eq!(h.session.state(), SessionState::Connected);
        assert_eq!(h.notifier.connections(), vec![true]);
        h.session.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_poll_failure_disconnects_once() {
        let h = harness_with(test_config(), true, |_| {});
        h.session.connect(ADDR).await.unwrap();
        h.script.link_lost.store(true, Ordering::SeqCst);
        let session = h.session.clone();
        wait_for(|| session.state() == SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.notifier.connections(), vec![true, false]);
        assert!(!h.transport.link_up());
        assert_eq!(h.adapter.opens(), 1);
        // later disconnect has nothing to close
        h.session.disconnect().unwrap();
        assert_eq!(h.notifier.connections(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_poll_failure_reconnects_when_enabled() {
        let config = BridgeConfig {
            auto_reconnect: true,
            ..test_config()
        };
        let h = harness_with(config, true, |_| {});
        h.session.connect(ADDR).await.unwrap();
        h.script.link_lost.store(true, Ordering::SeqCst);
        let notifier = h.notifier.clone();
        wait_for(|| notifier.connections().len() == 3).await;
        assert_eq!(h.notifier.connections(), vec![true, false, true]);
        assert_eq!(h.session.state(), SessionState::Connected);
        assert_eq!(h.adapter.opens(), 2);
        h.session.disconnect().unwrap();
    }
}
