//! BLE-FTP Protocol Implementation
//!
//! This library implements the client side of the BLE-FTP file transfer
//! protocol: small files move between a central and a peripheral over a
//! single GATT data characteristic, framed as opcode-tagged packets and
//! correlated by a one-byte transfer id.
//!
//! The platform Bluetooth stack stays behind the [`GattClient`] trait; the
//! engine supplies framing, strict serialization of GATT operations, the
//! connection state machine with one-shot reconnect, and chunked read/write
//! transfers.
//!
//! ```rust,ignore
//! use ble_ftp_protocol::{FtpSession, SessionConfig};
//!
//! let session = FtpSession::new(gatt, SessionConfig::default());
//! session.start().await?;
//! session.connect("AA:BB:CC:DD:EE:FF").await?;
//! let config = session.read_file("config.json").await?;
//! session.write_file("config.json", new_config.as_bytes()).await?;
//! session.disconnect().await?;
//! ```

pub mod discovery;
pub mod gatt;
pub mod packet;
pub mod queue;
pub mod session;
pub mod transfer;

mod error;

pub use discovery::{DeviceRegistry, FRESHNESS_WINDOW_MS};
pub use error::{FtpError, Result};
pub use gatt::{
    ConnectionPriority, GattClient, LinkEvent, ScanRecord, DEVICE_INFO_SERVICE_UUID,
    FIRMWARE_REVISION_UUID, FTP_DATA_UUID, FTP_SERVICE_UUID, HARDWARE_REVISION_UUID,
    SERIAL_NUMBER_UUID, SOFTWARE_REVISION_UUID, SYSTEM_ID_UUID,
};
pub use packet::{Opcode, Packet, HEADER_LEN, MAX_FILENAME_LEN};
pub use queue::SerialQueue;
pub use session::{
    ConnectionState, DeviceHandle, DeviceInfo, FtpSession, SessionConfig, SessionEvent,
    BLE_MTU_DEFAULT, CHUNK_SIZE_MAX, CHUNK_SIZE_MIN, DISCONNECT_TIMEOUT, GATT_MAX_ATTR_LEN,
    GATT_WRITE_OVERHEAD, MTU_REQUEST,
};
pub use transfer::MAX_WRITE_LEN;

#[cfg(test)]
pub mod test_utils;
