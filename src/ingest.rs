//! UDP ingestion.
//!
//! [`UdpListener`] reads datagrams and copies each one into a bounded queue.
//! A single worker ([`run_worker`]) drains the queue through the
//! [`Pipeline`], so events are processed in arrival order.
//!
//! UDP has no backpressure: when the queue is full the datagram is dropped
//! and counted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Metrics, Pipeline};
use crate::shutdown::ShutdownSignal;

/// Largest datagram accepted (1 MiB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Default number of datagrams buffered between listener and worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub struct UdpListener {
    socket: UdpSocket,
    max_packet_size: usize,
}

impl UdpListener {
    pub async fn bind(addr: &str, max_packet_size: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            max_packet_size,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the read loop. It stops on shutdown or when the queue closes,
    /// dropping `queue` so the worker can drain and exit.
    pub fn spawn(
        self,
        queue: mpsc::Sender<Vec<u8>>,
        metrics: Arc<Metrics>,
        shutdown: &ShutdownSignal,
    ) -> JoinHandle<()> {
        let receiver = shutdown.subscribe();
        tokio::spawn(self.run(queue, metrics, receiver))
    }

    async fn run(
        self,
        queue: mpsc::Sender<Vec<u8>>,
        metrics: Arc<Metrics>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut buf = vec![0u8; self.max_packet_size];

        if let Ok(addr) = self.socket.local_addr() {
            info!(addr = %addr, "Listening for UDP events");
        }

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, closing UDP listener");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Failed to read datagram");
                    continue;
                }
            };

            debug!(peer = %peer, bytes = len, "Datagram received");

            match queue.try_send(buf[..len].to_vec()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics.record_dropped();
                    warn!(peer = %peer, bytes = len, "Ingestion queue full, dropping datagram");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!("Ingestion queue closed, stopping UDP listener");
                    break;
                }
            }
        }
    }
}

/// Drain the queue through the pipeline until every sender is dropped.
///
/// Pipeline errors are already logged by the pipeline; the worker only
/// keeps going.
pub async fn run_worker(pipeline: Arc<Pipeline>, mut queue: mpsc::Receiver<Vec<u8>>) -> u64 {
    let mut processed: u64 = 0;

    while let Some(raw) = queue.recv().await {
        if pipeline.process(&raw).await.is_ok() {
            processed += 1;
        }
    }

    info!(events_processed = processed, "Pipeline worker finished");
    processed
}
