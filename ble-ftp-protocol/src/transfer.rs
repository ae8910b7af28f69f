//! Chunked file transfers
//!
//! A transfer occupies one transfer queue slot from request to final frame,
//! issuing each GATT read or write as its own operation queue unit. Reads
//! reassemble `DATA_CONTINUATION` payloads until `DATA_FINAL`; writes send a
//! `WRITE_REQUEST` followed by chunk-size slices of the source, flagging the
//! last slice `DATA_FINAL`.
//!
//! Every exit path restores balanced connection priority. Transport failures
//! run the session liveness check: a dead link escalates to the reconnect
//! machinery, a live one fails only the transfer. Protocol violations fail
//! the transfer without touching the link.

use crate::error::{FtpError, Result};
use crate::gatt::{ConnectionPriority, FTP_DATA_UUID, FTP_SERVICE_UUID};
use crate::packet::{validate_filename, Opcode, Packet};
use crate::session::FtpSession;
use tracing::{debug, info, warn};

/// Largest write source accepted, in bytes
pub const MAX_WRITE_LEN: usize = 1024 * 1024;

impl FtpSession {
    /// Read a file from the peripheral and decode it as UTF-8 text
    ///
    /// Queued behind any transfer already in flight; at most one transfer
    /// touches the wire at a time.
    pub async fn read_file(&self, filename: &str) -> Result<String> {
        validate_filename(filename)?;

        let session = self.clone();
        let filename = filename.to_string();
        self.transfer_queue
            .run(async move { session.run_read(filename).await })
            .await?
    }

    /// Write a file to the peripheral
    ///
    /// Sources over [`MAX_WRITE_LEN`] are rejected before anything touches
    /// the wire.
    pub async fn write_file(&self, filename: &str, data: &[u8]) -> Result<()> {
        validate_filename(filename)?;
        if data.len() > MAX_WRITE_LEN {
            return Err(FtpError::WriteTooLarge {
                size: data.len(),
                max: MAX_WRITE_LEN,
            });
        }

        let session = self.clone();
        let filename = filename.to_string();
        let data = data.to_vec();
        self.transfer_queue
            .run(async move { session.run_write(filename, data).await })
            .await?
    }

    async fn run_read(&self, filename: String) -> Result<String> {
        let device = self.require_device().await?;
        let xid = self.next_transfer_id().await;
        info!("read transfer {:#04x} for {:?} starting", xid, filename);

        self.set_priority(ConnectionPriority::High).await;
        let result = self.read_loop(&device.address, xid, &filename).await;
        self.set_priority(ConnectionPriority::Balanced).await;

        match &result {
            Ok(text) => info!(
                "read transfer {:#04x} complete: {} bytes",
                xid,
                text.len()
            ),
            Err(e) => warn!("read transfer {:#04x} failed: {}", xid, e),
        }
        result
    }

    async fn read_loop(&self, address: &str, xid: u8, filename: &str) -> Result<String> {
        let request = Packet::request(Opcode::ReadRequest, xid, filename)?;
        if let Err(e) = self.send_packet(address, &request).await {
            return Err(self.wire_failure(e).await);
        }

        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let bytes = match self
                .op_read(address, FTP_SERVICE_UUID, FTP_DATA_UUID)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => return Err(self.wire_failure(e).await),
            };
            if bytes.is_empty() {
                let err = FtpError::InvalidPacket("empty frame".to_string());
                return Err(self.wire_failure(err).await);
            }

            let packet = match Packet::decode(&bytes) {
                Ok(packet) => packet,
                Err(e) => return Err(self.wire_failure(e).await),
            };

            if packet.transfer_id != xid {
                let err = FtpError::TransferIdMismatch {
                    expected: xid,
                    received: packet.transfer_id,
                };
                return Err(self.wire_failure(err).await);
            }

            match packet.opcode {
                Opcode::DataContinuation => {
                    debug!(
                        "transfer {:#04x}: chunk of {} bytes, {} so far",
                        xid,
                        packet.payload.len(),
                        buffer.len() + packet.payload.len()
                    );
                    buffer.extend_from_slice(&packet.payload);
                }
                Opcode::DataFinal => {
                    buffer.extend_from_slice(&packet.payload);
                    debug!("transfer {:#04x}: final frame, {} bytes total", xid, buffer.len());
                    return Ok(String::from_utf8_lossy(&buffer).into_owned());
                }
                other => {
                    let err = FtpError::InvalidPacket(format!("unexpected {} during read", other));
                    return Err(self.wire_failure(err).await);
                }
            }
        }
    }

    async fn run_write(&self, filename: String, data: Vec<u8>) -> Result<()> {
        let device = self.require_device().await?;
        let xid = self.next_transfer_id().await;
        let chunk_size = self.chunk_size().await;
        info!(
            "write transfer {:#04x} for {:?} starting: {} bytes in {} byte chunks",
            xid,
            filename,
            data.len(),
            chunk_size
        );

        self.set_priority(ConnectionPriority::High).await;
        let result = self
            .write_loop(&device.address, xid, &filename, &data, chunk_size)
            .await;
        self.set_priority(ConnectionPriority::Balanced).await;

        match &result {
            Ok(()) => info!("write transfer {:#04x} complete", xid),
            Err(e) => warn!("write transfer {:#04x} failed: {}", xid, e),
        }
        result
    }

    async fn write_loop(
        &self,
        address: &str,
        xid: u8,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<()> {
        let request = Packet::request(Opcode::WriteRequest, xid, filename)?;
        if let Err(e) = self.send_packet(address, &request).await {
            return Err(self.wire_failure(e).await);
        }

        let total = data.len();
        let mut offset = 0;
        loop {
            let end = (offset + chunk_size).min(total);
            let opcode = if end == total {
                Opcode::DataFinal
            } else {
                Opcode::DataContinuation
            };
            let packet = Packet::new(opcode, xid, data[offset..end].to_vec());

            // A failed chunk ends the transfer; the rest of the source is
            // never sent.
            if let Err(e) = self.send_packet(address, &packet).await {
                return Err(self.wire_failure(e).await);
            }
            debug!(
                "transfer {:#04x}: {} at offset {} ({} bytes)",
                xid,
                opcode,
                offset,
                end - offset
            );

            if opcode == Opcode::DataFinal {
                return Ok(());
            }
            offset = end;
        }
    }

    /// Send one frame as a single operation queue unit
    async fn send_packet(&self, address: &str, packet: &Packet) -> Result<()> {
        self.op_write(address, FTP_SERVICE_UUID, FTP_DATA_UUID, packet.encode())
            .await
    }

    /// Classify a wire failure
    ///
    /// Protocol violations fail the transfer and say nothing about the link;
    /// errors that already name a lost link pass through unchanged. Anything
    /// else runs the liveness check: a dead link escalates in the background
    /// and reports `Disconnected`, a live one hands the original error back.
    async fn wire_failure(&self, err: FtpError) -> FtpError {
        warn!("wire operation failed: {}", err);
        if err.is_transfer_only() || err.is_connection_loss() {
            return err;
        }
        match self.liveness_or_link_down().await {
            Ok(()) => err,
            Err(link_err) => link_err,
        }
    }
}
