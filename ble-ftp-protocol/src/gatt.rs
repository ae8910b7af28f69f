//! GATT collaborator interface
//!
//! The protocol engine drives the radio through the [`GattClient`] trait.
//! Implementations wrap a platform Bluetooth stack; tests script one. All
//! methods are connection-scoped by device address because a GATT central may
//! hold links to several peripherals even though this engine uses one at a
//! time.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::{uuid, Uuid};

/// FTP service UUID (16-bit 0xfffa expanded over the Bluetooth base UUID)
pub const FTP_SERVICE_UUID: Uuid = uuid!("0000fffa-0000-1000-8000-00805f9b34fb");

/// FTP data characteristic UUID (0xfffb): all frames move through this one
pub const FTP_DATA_UUID: Uuid = uuid!("0000fffb-0000-1000-8000-00805f9b34fb");

/// Standard Device Information service (0x180a)
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Serial Number String characteristic (0x2a25)
pub const SERIAL_NUMBER_UUID: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Firmware Revision String characteristic (0x2a26)
pub const FIRMWARE_REVISION_UUID: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Hardware Revision String characteristic (0x2a27)
pub const HARDWARE_REVISION_UUID: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");

/// System ID characteristic (0x2a23)
pub const SYSTEM_ID_UUID: Uuid = uuid!("00002a23-0000-1000-8000-00805f9b34fb");

/// Software Revision String characteristic (0x2a28)
pub const SOFTWARE_REVISION_UUID: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

/// Connection priority hint for the platform stack
///
/// High priority shortens the connection interval for throughput; balanced is
/// the idle default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPriority {
    High,
    Balanced,
    LowPower,
}

impl fmt::Display for ConnectionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPriority::High => write!(f, "high"),
            ConnectionPriority::Balanced => write!(f, "balanced"),
            ConnectionPriority::LowPower => write!(f, "low-power"),
        }
    }
}

/// Asynchronous link reports from the platform stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The stack reports the link to `address` went down
    Disconnected { address: String },
    /// The Bluetooth adapter was switched off
    AdapterDisabled,
}

/// One advertisement sighting during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Peripheral address
    pub address: String,
    /// Advertised local name, when present
    pub name: Option<String>,
    /// Signal strength at sighting time, in dBm
    pub rssi: i16,
    /// Raw advertisement payload, when the stack exposes it
    pub advertisement: Option<Vec<u8>>,
    /// When this sighting happened
    pub last_seen: DateTime<Utc>,
}

impl ScanRecord {
    /// Create a record stamped with the current time
    pub fn new(address: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            advertisement: None,
            last_seen: Utc::now(),
        }
    }
}

/// Platform GATT central, as seen by the protocol engine
///
/// Implementations must be callable from multiple tasks; the engine clones
/// the trait object into queue units and spawned handlers.
#[async_trait]
pub trait GattClient: Send + Sync {
    /// Start scanning for peripherals advertising any of `services`
    ///
    /// Sightings stream out until [`GattClient::stop_scan`] is called or the
    /// receiver is dropped.
    async fn start_scan(&self, services: &[Uuid]) -> Result<mpsc::UnboundedReceiver<ScanRecord>>;

    /// Stop an active scan
    async fn stop_scan(&self) -> Result<()>;

    /// Open a link to `address`
    ///
    /// `auto_connect` asks the stack to keep trying in the background rather
    /// than failing fast.
    async fn connect(&self, address: &str, auto_connect: bool) -> Result<()>;

    /// Re-open a previously established link without a fresh discovery cycle
    async fn reconnect(&self, address: &str) -> Result<()>;

    /// Close the link to `address`
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Release all stack resources for `address`
    ///
    /// Called after [`GattClient::disconnect`]; BlueZ-style stacks leak
    /// handles without it.
    async fn close(&self, address: &str) -> Result<()>;

    /// Run service discovery on an open link
    async fn discover_services(&self, address: &str) -> Result<()>;

    /// Read a characteristic value
    async fn read_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>>;

    /// Write a characteristic value
    async fn write_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Subscribe to characteristic notifications
    async fn subscribe(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Request an MTU, returning the value the peripheral granted
    async fn request_mtu(&self, address: &str, mtu: u16) -> Result<u16>;

    /// Request a connection priority change
    async fn request_connection_priority(
        &self,
        address: &str,
        priority: ConnectionPriority,
    ) -> Result<()>;

    /// Whether the stack currently reports a link to `address`
    async fn is_connected(&self, address: &str) -> bool;

    /// Whether the Bluetooth adapter is powered on
    async fn is_adapter_enabled(&self) -> bool;

    /// Stream of unsolicited link reports
    async fn link_events(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>>;
}
