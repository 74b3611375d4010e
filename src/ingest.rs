//! The ingest loop: read lines, decode, fan out.
//!
//! One loop owns the transport's read half. Every decoded packet goes to
//! the live buffer without blocking and, when a store is attached, to a
//! fire-and-forget insert task. Malformed lines and read errors are
//! counted and skipped; nothing on this path is allowed to stop the loop
//! except cancellation or end of stream.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::live::LiveSender;
use crate::packet::decode_line;
use crate::store::PacketStore;

/// Counters for the ingest loop.
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub lines_read: u64,
    pub packets_decoded: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
    pub persisted: u64,
    pub persist_errors: u64,
}

/// Drives ingestion from any line-oriented reader.
pub struct IngestLoop {
    live: LiveSender,
    store: Option<Arc<PacketStore>>,
    stats: Arc<RwLock<IngestStats>>,
    shutdown: CancellationToken,
}

impl IngestLoop {
    /// `store` is optional so the station can run live-only when the
    /// database is down.
    pub fn new(
        live: LiveSender,
        store: Option<Arc<PacketStore>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            live,
            store,
            stats: Arc::new(RwLock::new(IngestStats::default())),
            shutdown,
        }
    }

    /// Get current ingest statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Shared handle to the statistics, for periodic reporting tasks.
    pub fn stats_handle(&self) -> Arc<RwLock<IngestStats>> {
        Arc::clone(&self.stats)
    }

    /// Consume the reader line by line until cancellation or end of
    /// stream. Read errors skip to the next line.
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) {
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("ingest loop cancelled");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(&line),
                    Ok(None) => {
                        warn!("transport stream ended");
                        break;
                    }
                    Err(e) => {
                        self.stats.write().read_errors += 1;
                        metrics::counter!("station.ingest.read_errors").increment(1);
                        warn!(error = %e, "transport read failed, continuing");
                    }
                },
            }
        }

        let stats = self.stats();
        info!(
            lines_read = stats.lines_read,
            packets_decoded = stats.packets_decoded,
            decode_errors = stats.decode_errors,
            read_errors = stats.read_errors,
            "ingest loop finished"
        );
    }

    fn handle_line(&self, line: &str) {
        self.stats.write().lines_read += 1;
        metrics::counter!("station.ingest.lines_read").increment(1);

        let packet = match decode_line(line) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.write().decode_errors += 1;
                metrics::counter!("station.ingest.decode_errors").increment(1);
                warn!(error = %e, "discarding undecodable line");
                debug!(line, "discarded payload");
                return;
            }
        };

        self.stats.write().packets_decoded += 1;
        metrics::counter!("station.ingest.packets_decoded").increment(1);

        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let stats = Arc::clone(&self.stats);
            let record = packet.clone();
            tokio::spawn(async move {
                match store.insert(&record).await {
                    Ok(_) => stats.write().persisted += 1,
                    Err(e) => {
                        stats.write().persist_errors += 1;
                        metrics::counter!("station.store.insert_errors").increment(1);
                        error!(error = %e, "packet insert failed");
                    }
                }
            });
        }

        self.live.offer(packet);
    }
}
