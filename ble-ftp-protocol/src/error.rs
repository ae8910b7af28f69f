//! Error handling for the BLE-FTP protocol engine
//!
//! All fallible public APIs return [`Result`]. Failures surface as typed
//! [`FtpError`] values; the engine never panics across its API boundary.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! Failures reported by the GATT collaborator (`Gatt`, `Io`). These say
//! nothing about the link as a whole; the session runs its liveness check to
//! decide whether the connection survived.
//!
//! ### Protocol Errors
//! Frames that violate the wire format (`InvalidPacket`) or carry the wrong
//! correlation id (`TransferIdMismatch`). These fail the current transfer but
//! leave the connection up.
//!
//! ### Connection Errors
//! The link or the adapter is gone (`NotConnected`, `Disconnected`,
//! `AdapterDisabled`), or queued work was abandoned by a disconnect
//! (`Cancelled`).
//!
//! ### Caller Errors
//! Invalid input rejected before any wire activity (`FilenameTooLong`,
//! `WriteTooLarge`, `InvalidState`).

use thiserror::Error;

/// Result type for protocol operations
///
/// # Examples
///
/// ```rust
/// use ble_ftp_protocol::Result;
///
/// fn example() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, FtpError>;

/// Errors that can occur during BLE-FTP operations
///
/// # Examples
///
/// ```rust
/// use ble_ftp_protocol::FtpError;
///
/// let error = FtpError::TransferIdMismatch { expected: 0x01, received: 0x09 };
/// assert_eq!(
///     error.to_string(),
///     "Transfer id mismatch: expected 0x01, received 0x09"
/// );
///
/// let error = FtpError::FilenameTooLong(24);
/// assert_eq!(error.to_string(), "Filename too long: 24 bytes (max: 18)");
/// ```
#[derive(Error, Debug)]
pub enum FtpError {
    /// I/O error surfaced by a collaborator implementation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// GATT operation failed
    ///
    /// Covers read, write, subscribe, discovery and connection primitives.
    #[error("GATT error: {0}")]
    Gatt(String),

    /// Frame violates the wire format
    ///
    /// Undecodable header, unknown opcode, or an empty frame where data was
    /// expected.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Response carried a transfer id other than the one in flight
    #[error("Transfer id mismatch: expected {expected:#04x}, received {received:#04x}")]
    TransferIdMismatch { expected: u8, received: u8 },

    /// Operation requires an active connection
    #[error("Not connected")]
    NotConnected,

    /// The link dropped, or the liveness check found it dead
    #[error("Disconnected")]
    Disconnected,

    /// The Bluetooth adapter is disabled
    #[error("Bluetooth adapter disabled")]
    AdapterDisabled,

    /// Queued work was abandoned by a disconnect or queue clear
    #[error("Operation cancelled")]
    Cancelled,

    /// Filename exceeds the request payload limit
    #[error("Filename too long: {0} bytes (max: 18)")]
    FilenameTooLong(usize),

    /// Write source exceeds the single-buffer size cap
    #[error("Write too large: {size} bytes (max: {max})")]
    WriteTooLarge { size: usize, max: usize },

    /// Operation attempted in a state that cannot serve it
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl FtpError {
    /// Check whether this error means the connection itself is gone
    ///
    /// Returns `true` for errors that require reconnecting before any further
    /// operation can succeed, `false` for errors that only failed the
    /// operation at hand.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ble_ftp_protocol::FtpError;
    ///
    /// assert!(FtpError::Disconnected.is_connection_loss());
    /// assert!(!FtpError::InvalidPacket("short frame".to_string()).is_connection_loss());
    /// ```
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            FtpError::NotConnected | FtpError::Disconnected | FtpError::AdapterDisabled
        )
    }

    /// Check whether this error fails only the transfer it occurred in
    ///
    /// Protocol violations terminate the current transfer without touching
    /// connection state.
    pub fn is_transfer_only(&self) -> bool {
        matches!(
            self,
            FtpError::InvalidPacket(_) | FtpError::TransferIdMismatch { .. }
        )
    }

    /// Create a GATT error from any displayable failure
    pub fn gatt(msg: impl Into<String>) -> Self {
        FtpError::Gatt(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        FtpError::InvalidState(msg.into())
    }
}
