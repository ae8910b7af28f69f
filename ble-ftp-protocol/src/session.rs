//! Connection lifecycle and session state
//!
//! [`FtpSession`] owns the connection state machine, the negotiated chunk
//! size, the transfer-id counter and the two work queues. It drives the
//! platform stack through the [`GattClient`] seam and reports lifecycle
//! changes as [`SessionEvent`]s.
//!
//! Connection setup runs a fixed sequence: stop scanning, raise connection
//! priority, negotiate the MTU, discover services, then prove the FTP data
//! characteristic is reachable with one read. Only after that read succeeds
//! is the session `Connected`.

use crate::discovery::DeviceRegistry;
use crate::error::{FtpError, Result};
use crate::gatt::{
    ConnectionPriority, GattClient, LinkEvent, ScanRecord, DEVICE_INFO_SERVICE_UUID,
    FIRMWARE_REVISION_UUID, FTP_DATA_UUID, FTP_SERVICE_UUID, HARDWARE_REVISION_UUID,
    SOFTWARE_REVISION_UUID, SYSTEM_ID_UUID,
};
use crate::packet::HEADER_LEN;
use crate::queue::SerialQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// ATT write overhead the stack reserves out of the MTU
pub const GATT_WRITE_OVERHEAD: usize = 3;

/// Maximum attribute value length
pub const GATT_MAX_ATTR_LEN: usize = 512;

/// Default BLE MTU before negotiation
pub const BLE_MTU_DEFAULT: usize = 23;

/// MTU requested from the peripheral during setup
pub const MTU_REQUEST: u16 = (GATT_MAX_ATTR_LEN + GATT_WRITE_OVERHEAD) as u16;

/// Smallest usable data payload per frame (default MTU minus overheads)
pub const CHUNK_SIZE_MIN: usize = BLE_MTU_DEFAULT - GATT_WRITE_OVERHEAD - HEADER_LEN;

/// Largest data payload per frame (attribute limit minus the header)
pub const CHUNK_SIZE_MAX: usize = GATT_MAX_ATTR_LEN - HEADER_LEN;

/// Default bound on how long a disconnect may block
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Identity of the device a session talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub address: String,
    pub name: Option<String>,
}

/// Standard Device Information characteristics, as far as they could be read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub sw_version: Option<String>,
    pub system_id: Option<String>,
    pub hw_version: Option<String>,
    pub fw_version: Option<String>,
}

/// Lifecycle notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { address: String },
    Disconnected { address: Option<String> },
}

/// Session tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// MTU to request during setup
    pub mtu_request: u16,
    /// Bound on how long a disconnect may block
    pub disconnect_timeout: Duration,
    /// Fixed chunk size for hosts whose stack ignores MTU negotiation,
    /// clamped to the protocol bounds; skips negotiation entirely
    pub chunk_size_override: Option<usize>,
    /// Retry once with the auto-connect hint after an unexpected drop
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu_request: MTU_REQUEST,
            disconnect_timeout: DISCONNECT_TIMEOUT,
            chunk_size_override: None,
            auto_reconnect: true,
        }
    }
}

struct SessionInner {
    state: ConnectionState,
    device: Option<DeviceHandle>,
    paused_device: Option<DeviceHandle>,
    chunk_size: usize,
    transfer_id: u8,
}

/// BLE-FTP session against a single peripheral
#[derive(Clone)]
pub struct FtpSession {
    gatt: Arc<dyn GattClient>,
    config: SessionConfig,
    inner: Arc<RwLock<SessionInner>>,
    pub(crate) op_queue: Arc<SerialQueue>,
    pub(crate) transfer_queue: Arc<SerialQueue>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<SessionEvent>>>,
    registry: Arc<RwLock<DeviceRegistry>>,
    scan_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FtpSession {
    /// Create a session over a GATT collaborator
    pub fn new(gatt: Arc<dyn GattClient>, config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            gatt,
            config,
            inner: Arc::new(RwLock::new(SessionInner {
                state: ConnectionState::Disconnected,
                device: None,
                paused_device: None,
                chunk_size: CHUNK_SIZE_MIN,
                transfer_id: 0,
            })),
            op_queue: Arc::new(SerialQueue::new("operation")),
            transfer_queue: Arc::new(SerialQueue::new("transfer")),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            registry: Arc::new(RwLock::new(DeviceRegistry::new())),
            scan_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start listening for unsolicited link reports from the stack
    pub async fn start(&self) -> Result<()> {
        let mut events = self.gatt.link_events().await?;
        let session = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LinkEvent::Disconnected { address } => {
                        let current = { session.inner.read().await.device.clone() };
                        match current {
                            Some(device) if device.address == address => {
                                info!("stack reports link to {} down", address);
                                session.handle_link_down().await;
                            }
                            _ => debug!("ignoring disconnect report for {}", address),
                        }
                    }
                    LinkEvent::AdapterDisabled => {
                        warn!("Bluetooth adapter disabled");
                        session.force_disconnected().await;
                    }
                }
            }
            debug!("link event stream ended");
        });

        info!("session started");
        Ok(())
    }

    /// Get a receiver for session lifecycle events
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Forward events
        let event_rx = self.event_rx.clone();
        tokio::spawn(async move {
            let mut rx_lock = event_rx.write().await;
            while let Some(event) = rx_lock.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Connect to a peripheral by address
    ///
    /// If the stack still reports an old link to the same address, that link
    /// is torn down first.
    pub async fn connect(&self, target: &str) -> Result<()> {
        let device = self.resolve_target(target).await;
        info!("connecting to {}", device.address);

        let _ = self.gatt.stop_scan().await;

        if self.gatt.is_connected(&device.address).await {
            debug!("{} already reported connected, tearing down stale link", device.address);
            self.teardown_link(&device.address).await;
        }

        self.connect_flow(device, false, false, 1).await
    }

    /// Disconnect from the current device
    ///
    /// Idempotent: with no active device this is a no-op that settles the
    /// state without touching the stack.
    pub async fn disconnect(&self) -> Result<()> {
        let device = { self.inner.read().await.device.clone() };
        let Some(device) = device else {
            let mut guard = self.inner.write().await;
            guard.state = ConnectionState::Disconnected;
            debug!("disconnect with no active device");
            return Ok(());
        };

        info!("disconnecting from {}", device.address);
        self.teardown_link(&device.address).await;
        self.emit(SessionEvent::Disconnected {
            address: Some(device.address),
        });
        Ok(())
    }

    /// Drop the link but remember the device for [`FtpSession::resume`]
    pub async fn pause(&self) -> Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.paused_device = guard.device.clone();
        }
        debug!("pausing session");
        self.disconnect().await
    }

    /// Re-establish the link dropped by [`FtpSession::pause`]
    ///
    /// Tries the stack's cheaper reconnect first and falls back to a full
    /// connect cycle.
    pub async fn resume(&self) -> Result<()> {
        let device = { self.inner.read().await.paused_device.clone() }
            .ok_or_else(|| FtpError::invalid_state("no paused connection to resume"))?;
        info!("resuming connection to {}", device.address);
        self.connect_flow(device, true, false, 1).await
    }

    /// Confirm the connection is actually usable
    ///
    /// Checks the adapter, the stack's link status, then proves the FTP data
    /// characteristic still answers a read.
    pub async fn verify_connected(&self) -> Result<()> {
        if !self.gatt.is_adapter_enabled().await {
            return Err(FtpError::AdapterDisabled);
        }
        let device = self.require_device().await?;
        if !self.gatt.is_connected(&device.address).await {
            return Err(FtpError::Disconnected);
        }
        self.op_read(&device.address, FTP_SERVICE_UUID, FTP_DATA_UUID)
            .await?;
        Ok(())
    }

    /// Read the standard Device Information characteristics
    ///
    /// A failed read stops the sequence: if the liveness check passes, the
    /// fields gathered so far are returned; if not, the connection is gone
    /// and the error says so.
    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        let device = self.require_device().await?;
        info!("reading device information from {}", device.address);

        let mut info = DeviceInfo {
            name: device.name.clone(),
            ..DeviceInfo::default()
        };

        match self.read_info(&device.address, SOFTWARE_REVISION_UUID).await {
            Ok(bytes) => info.sw_version = Some(sanitize_revision(&bytes)),
            Err(e) => return self.partial_device_info(info, e).await,
        }
        match self.read_info(&device.address, SYSTEM_ID_UUID).await {
            Ok(bytes) => info.system_id = Some(format_system_id(&bytes)),
            Err(e) => return self.partial_device_info(info, e).await,
        }
        match self.read_info(&device.address, HARDWARE_REVISION_UUID).await {
            Ok(bytes) => info.hw_version = Some(sanitize_revision(&bytes)),
            Err(e) => return self.partial_device_info(info, e).await,
        }
        match self.read_info(&device.address, FIRMWARE_REVISION_UUID).await {
            Ok(bytes) => info.fw_version = Some(sanitize_revision(&bytes)),
            Err(e) => return self.partial_device_info(info, e).await,
        }

        Ok(info)
    }

    /// Read an arbitrary characteristic through the operation queue
    pub async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        let device = self.require_device().await?;
        match self.op_read(&device.address, service, characteristic).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                // The link may have died under the read.
                self.liveness_or_link_down().await?;
                Err(e)
            }
        }
    }

    /// Write an arbitrary characteristic through the operation queue
    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let device = self.require_device().await?;
        self.op_write(&device.address, service, characteristic, value)
            .await
    }

    /// Subscribe to characteristic notifications
    ///
    /// The subscription setup occupies one operation queue unit.
    pub async fn subscribe_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let device = self.require_device().await?;
        let gatt = Arc::clone(&self.gatt);
        let address = device.address;
        self.op_queue
            .run(async move { gatt.subscribe(&address, service, characteristic).await })
            .await?
    }

    /// Start scanning for FTP-capable peripherals
    ///
    /// Sightings land in the known-device registry until the scan stops.
    pub async fn start_scan(&self) -> Result<()> {
        let mut stream = self.gatt.start_scan(&[FTP_SERVICE_UUID]).await?;
        info!("scan started");

        let registry = Arc::clone(&self.registry);
        let task = tokio::spawn(async move {
            while let Some(record) = stream.recv().await {
                registry.write().await.insert(record);
            }
            debug!("scan stream ended");
        });

        let mut guard = self.scan_task.lock().await;
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop an active scan
    pub async fn stop_scan(&self) -> Result<()> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        self.gatt.stop_scan().await
    }

    /// Every device the registry knows, fresh or stale
    pub async fn known_devices(&self) -> Vec<ScanRecord> {
        self.registry.read().await.all()
    }

    /// Devices sighted within the freshness window
    pub async fn fresh_devices(&self) -> Vec<ScanRecord> {
        self.registry.read().await.fresh()
    }

    /// Forget every known device
    pub async fn clear_known_devices(&self) {
        self.registry.write().await.clear();
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    /// The connected device, if any
    pub async fn device(&self) -> Option<DeviceHandle> {
        self.inner.read().await.device.clone()
    }

    /// Negotiated data payload size per frame
    pub async fn chunk_size(&self) -> usize {
        self.inner.read().await.chunk_size
    }

    // ---- internals ----------------------------------------------------

    async fn resolve_target(&self, target: &str) -> DeviceHandle {
        let registry = self.registry.read().await;
        match registry.get(target) {
            Some(record) => DeviceHandle {
                address: record.address.clone(),
                name: record.name.clone(),
            },
            None => DeviceHandle {
                address: target.to_string(),
                name: None,
            },
        }
    }

    /// Link attempt loop: one establish step, the shared setup sequence, and
    /// at most `retries` further attempts with the auto-connect hint
    async fn connect_flow(
        &self,
        device: DeviceHandle,
        mut use_reconnect: bool,
        mut auto_connect: bool,
        mut retries: u8,
    ) -> Result<()> {
        loop {
            {
                let mut guard = self.inner.write().await;
                guard.state = ConnectionState::Connecting;
            }

            let link = if use_reconnect {
                self.gatt.reconnect(&device.address).await
            } else {
                self.gatt.connect(&device.address, auto_connect).await
            };
            use_reconnect = false;

            if let Err(e) = link {
                warn!("connect to {} failed: {}", device.address, e);
                self.mark_disconnected(Some(device.address.clone())).await;
                return Err(e);
            }

            match self.setup_link(&device).await {
                Ok(()) => {
                    {
                        let mut guard = self.inner.write().await;
                        guard.state = ConnectionState::Connected;
                        guard.device = Some(device.clone());
                    }
                    info!("connected to {}", device.address);
                    self.emit(SessionEvent::Connected {
                        address: device.address.clone(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!("link setup for {} failed: {}", device.address, e);
                    self.teardown_link(&device.address).await;
                    if retries > 0 {
                        retries -= 1;
                        auto_connect = true;
                        info!("retrying {} once with auto-connect", device.address);
                        continue;
                    }
                    self.mark_disconnected(Some(device.address.clone())).await;
                    return Err(e);
                }
            }
        }
    }

    /// Post-link setup: priority, MTU, discovery, verification read
    async fn setup_link(&self, device: &DeviceHandle) -> Result<()> {
        // Scanning steals radio time from the fresh link.
        let _ = self.gatt.stop_scan().await;

        {
            let mut guard = self.inner.write().await;
            guard.device = Some(device.clone());
        }

        self.set_priority(ConnectionPriority::High).await;
        self.negotiate_mtu(&device.address).await;
        self.gatt.discover_services(&device.address).await?;

        // One read proves the FTP data characteristic actually answers.
        self.op_read(&device.address, FTP_SERVICE_UUID, FTP_DATA_UUID)
            .await?;
        Ok(())
    }

    /// Negotiate the MTU and derive the chunk size from it
    ///
    /// Never fails the setup: an unusable negotiation leaves the minimum
    /// chunk size in place.
    async fn negotiate_mtu(&self, address: &str) {
        if let Some(size) = self.config.chunk_size_override {
            let size = size.clamp(CHUNK_SIZE_MIN, CHUNK_SIZE_MAX);
            self.inner.write().await.chunk_size = size;
            debug!("fixed chunk size {} configured, skipping MTU negotiation", size);
            return;
        }

        match self.gatt.request_mtu(address, self.config.mtu_request).await {
            Ok(mtu) => {
                let size = (mtu as usize)
                    .saturating_sub(GATT_WRITE_OVERHEAD + HEADER_LEN)
                    .clamp(CHUNK_SIZE_MIN, CHUNK_SIZE_MAX);
                self.inner.write().await.chunk_size = size;
                info!("MTU {} granted, chunk size {}", mtu, size);
            }
            Err(e) => {
                warn!("MTU negotiation failed: {}, using minimum chunk size", e);
                self.inner.write().await.chunk_size = CHUNK_SIZE_MIN;
            }
        }
    }

    /// Drop the link: abandon queued work, disconnect within the configured
    /// bound, release stack resources
    pub(crate) async fn teardown_link(&self, address: &str) {
        self.op_queue.clear();
        self.transfer_queue.clear();

        {
            let mut guard = self.inner.write().await;
            guard.state = ConnectionState::Disconnecting;
        }

        match tokio::time::timeout(self.config.disconnect_timeout, self.gatt.disconnect(address))
            .await
        {
            Err(_) => warn!(
                "disconnect from {} still pending after {:?}, continuing",
                address, self.config.disconnect_timeout
            ),
            Ok(Err(e)) => debug!("disconnect from {} reported: {}", address, e),
            Ok(Ok(())) => {}
        }

        if let Err(e) = self.gatt.close(address).await {
            debug!("close for {} reported: {}", address, e);
        }

        let mut guard = self.inner.write().await;
        guard.state = ConnectionState::Disconnected;
        guard.device = None;
    }

    /// React to a link loss the session did not initiate
    pub(crate) async fn handle_link_down(&self) {
        let (state, device) = {
            let guard = self.inner.read().await;
            (guard.state, guard.device.clone())
        };

        let Some(device) = device else {
            debug!("link-down report with no active device");
            return;
        };
        if matches!(
            state,
            ConnectionState::Disconnecting | ConnectionState::Disconnected
        ) {
            debug!("link-down report during teardown, ignoring");
            return;
        }

        self.teardown_link(&device.address).await;

        if self.config.auto_reconnect {
            info!("lost link to {}, retrying once with auto-connect", device.address);
            let _ = self.connect_flow(device, false, true, 0).await;
        } else {
            self.mark_disconnected(Some(device.address)).await;
        }
    }

    /// Adapter gone: settle the state without touching the stack
    async fn force_disconnected(&self) {
        self.op_queue.clear();
        self.transfer_queue.clear();
        let address = {
            let mut guard = self.inner.write().await;
            guard.state = ConnectionState::Disconnected;
            guard.device.take().map(|d| d.address)
        };
        self.emit(SessionEvent::Disconnected { address });
    }

    /// Run the liveness check; a failure escalates to the link-down handling
    pub(crate) async fn liveness_or_link_down(&self) -> Result<()> {
        match self.verify_connected().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("liveness check failed: {}", e);
                let session = self.clone();
                tokio::spawn(async move {
                    session.handle_link_down().await;
                });
                Err(FtpError::Disconnected)
            }
        }
    }

    async fn mark_disconnected(&self, address: Option<String>) {
        {
            let mut guard = self.inner.write().await;
            guard.state = ConnectionState::Disconnected;
            guard.device = None;
        }
        self.emit(SessionEvent::Disconnected { address });
    }

    async fn partial_device_info(&self, info: DeviceInfo, err: FtpError) -> Result<DeviceInfo> {
        warn!("device info read failed: {}", err);
        self.liveness_or_link_down().await?;
        // Link is alive; hand back what was gathered.
        Ok(info)
    }

    async fn read_info(&self, address: &str, characteristic: Uuid) -> Result<Vec<u8>> {
        self.op_read(address, DEVICE_INFO_SERVICE_UUID, characteristic)
            .await
    }

    pub(crate) async fn require_device(&self) -> Result<DeviceHandle> {
        self.inner
            .read()
            .await
            .device
            .clone()
            .ok_or(FtpError::NotConnected)
    }

    pub(crate) async fn next_transfer_id(&self) -> u8 {
        let mut guard = self.inner.write().await;
        guard.transfer_id = guard.transfer_id.wrapping_add(1);
        guard.transfer_id
    }

    /// Request a priority change; failures are logged and swallowed because
    /// not every stack supports the hint
    pub(crate) async fn set_priority(&self, priority: ConnectionPriority) {
        let Some(device) = self.device().await else {
            return;
        };
        if let Err(e) = self
            .gatt
            .request_connection_priority(&device.address, priority)
            .await
        {
            debug!("{} priority not applied: {}", priority, e);
        }
    }

    /// One characteristic read as a single operation queue unit
    pub(crate) async fn op_read(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let gatt = Arc::clone(&self.gatt);
        let address = address.to_string();
        self.op_queue
            .run(async move {
                gatt.read_characteristic(&address, service, characteristic)
                    .await
            })
            .await?
    }

    /// One characteristic write as a single operation queue unit
    pub(crate) async fn op_write(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let gatt = Arc::clone(&self.gatt);
        let address = address.to_string();
        self.op_queue
            .run(async move {
                gatt.write_characteristic(&address, service, characteristic, &value)
                    .await
            })
            .await?
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Strip a revision string down to printable identifier characters
fn sanitize_revision(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | ',' | '_' | '-'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Render a System ID as colon-separated hex octets
fn format_system_id(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
