//! Scripted GATT collaborator for session and transfer tests
//!
//! [`MockGattClient`] answers characteristic reads from a queue of scripted
//! results, records every write, and exposes counters and knobs for the
//! connection primitives. Link events are injected by hand.

use crate::error::{FtpError, Result};
use crate::gatt::{ConnectionPriority, GattClient, LinkEvent, ScanRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Install a test subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// In-memory GATT central with scripted behavior
pub struct MockGattClient {
    /// Scripted results for `read_characteristic`, popped in order
    reads: Mutex<VecDeque<Result<Vec<u8>>>>,
    /// Every write that reached the wire: (service, characteristic, value)
    pub writes: Mutex<Vec<(Uuid, Uuid, Vec<u8>)>>,
    /// Scripted results for `write_characteristic`; empty means success
    write_results: Mutex<VecDeque<Result<()>>>,
    /// Scripted results for `connect`/`reconnect`; empty means success
    connect_results: Mutex<VecDeque<Result<()>>>,
    /// Scripted results for `request_mtu`; empty means the full request
    mtu_results: Mutex<VecDeque<Result<u16>>>,
    /// Priority changes in request order
    pub priority_requests: Mutex<Vec<ConnectionPriority>>,
    /// Records replayed by `start_scan`
    scan_records: Mutex<Vec<ScanRecord>>,

    connect_count: AtomicUsize,
    reconnect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    close_count: AtomicUsize,
    stop_scan_count: AtomicUsize,
    mtu_count: AtomicUsize,

    connected: AtomicBool,
    adapter_enabled: AtomicBool,

    link_tx: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    /// Keeps notification channels open for the lifetime of the mock
    notify_senders: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MockGattClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            write_results: Mutex::new(VecDeque::new()),
            connect_results: Mutex::new(VecDeque::new()),
            mtu_results: Mutex::new(VecDeque::new()),
            priority_requests: Mutex::new(Vec::new()),
            scan_records: Mutex::new(Vec::new()),
            connect_count: AtomicUsize::new(0),
            reconnect_count: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            stop_scan_count: AtomicUsize::new(0),
            mtu_count: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            adapter_enabled: AtomicBool::new(true),
            link_tx: Mutex::new(None),
            notify_senders: Mutex::new(Vec::new()),
        })
    }

    pub fn push_read(&self, result: Result<Vec<u8>>) {
        enqueue(&self.reads, result);
    }

    pub fn push_write_result(&self, result: Result<()>) {
        enqueue(&self.write_results, result);
    }

    pub fn push_connect_result(&self, result: Result<()>) {
        enqueue(&self.connect_results, result);
    }

    pub fn push_mtu(&self, result: Result<u16>) {
        enqueue(&self.mtu_results, result);
    }

    pub fn add_scan_record(&self, record: ScanRecord) {
        self.scan_records
            .try_lock()
            .expect("scan_records contended")
            .push(record);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_adapter_enabled(&self, enabled: bool) {
        self.adapter_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Push a notification to every active subscription
    pub fn notify(&self, value: Vec<u8>) {
        let senders = self
            .notify_senders
            .try_lock()
            .expect("notify_senders contended");
        for tx in senders.iter() {
            let _ = tx.send(value.clone());
        }
    }

    /// Deliver a link report; panics when no one called `link_events`
    pub fn inject_link_event(&self, event: LinkEvent) {
        let guard = self.link_tx.try_lock().expect("link_tx contended");
        guard
            .as_ref()
            .expect("link_events never requested")
            .send(event)
            .expect("link event receiver dropped");
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn stop_scan_calls(&self) -> usize {
        self.stop_scan_count.load(Ordering::SeqCst)
    }

    pub fn mtu_calls(&self) -> usize {
        self.mtu_count.load(Ordering::SeqCst)
    }
}

fn enqueue<T>(queue: &Mutex<VecDeque<T>>, value: T) {
    queue.try_lock().expect("script queue contended").push_back(value);
}

#[async_trait]
impl GattClient for MockGattClient {
    async fn start_scan(&self, _services: &[Uuid]) -> Result<mpsc::UnboundedReceiver<ScanRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for record in self.scan_records.lock().await.iter().cloned() {
            let _ = tx.send(record);
        }
        // Dropping tx ends the stream after the scripted sightings.
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stop_scan_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _address: &str, _auto_connect: bool) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        match self.connect_results.lock().await.pop_front() {
            Some(Err(e)) => Err(e),
            _ => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn reconnect(&self, _address: &str) -> Result<()> {
        self.reconnect_count.fetch_add(1, Ordering::SeqCst);
        match self.connect_results.lock().await.pop_front() {
            Some(Err(e)) => Err(e),
            _ => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, _address: &str) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_services(&self, _address: &str) -> Result<()> {
        Ok(())
    }

    async fn read_characteristic(
        &self,
        _address: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.reads
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(FtpError::gatt("unscripted read")))
    }

    async fn write_characteristic(
        &self,
        _address: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.writes
            .lock()
            .await
            .push((service, characteristic, value.to_vec()));
        match self.write_results.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        _address: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_senders.lock().await.push(tx);
        Ok(rx)
    }

    async fn request_mtu(&self, _address: &str, mtu: u16) -> Result<u16> {
        self.mtu_count.fetch_add(1, Ordering::SeqCst);
        match self.mtu_results.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(mtu),
        }
    }

    async fn request_connection_priority(
        &self,
        _address: &str,
        priority: ConnectionPriority,
    ) -> Result<()> {
        self.priority_requests.lock().await.push(priority);
        Ok(())
    }

    async fn is_connected(&self, _address: &str) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_adapter_enabled(&self) -> bool {
        self.adapter_enabled.load(Ordering::SeqCst)
    }

    async fn link_events(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.link_tx.lock().await = Some(tx);
        Ok(rx)
    }
}
