//! Bounded live views over the incoming packet flow.
//!
//! Everything here trades completeness for freshness: the hand-off queue
//! between the reader and any live consumer evicts its oldest entry when
//! full, and the display rings keep only the most recent window of
//! samples. Persistence is the store's job; nothing in this module blocks
//! the ingest loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::packet::Packet;

/// Chart window length, in samples.
pub const SERIES_CAPACITY: usize = 300;

/// Activity log window length, in lines.
pub const LOG_CAPACITY: usize = 200;

/// Fixed-capacity ring that overwrites its oldest entry when full.
#[derive(Debug)]
pub struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append a value, returning the evicted oldest entry if the ring was
    /// already full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let tail = (self.head + self.len) % self.slots.len();
        let evicted = self.slots[tail].replace(value);
        if evicted.is_some() {
            // Tail lapped the head; the oldest slot was just overwritten.
            self.head = (self.head + 1) % self.slots.len();
        } else {
            self.len += 1;
        }
        evicted
    }

    /// Remove and return the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.head + self.len - 1) % self.slots.len()].as_ref()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

struct LiveShared {
    queue: Mutex<Ring<Packet>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Producer half of the live hand-off queue.
pub struct LiveSender {
    shared: Arc<LiveShared>,
}

/// Consumer half of the live hand-off queue.
pub struct LiveReceiver {
    shared: Arc<LiveShared>,
}

/// Create a bounded hand-off queue between the ingest loop and one live
/// consumer. A full queue evicts its oldest packet instead of blocking
/// the producer.
pub fn live_buffer(capacity: usize) -> (LiveSender, LiveReceiver) {
    let shared = Arc::new(LiveShared {
        queue: Mutex::new(Ring::with_capacity(capacity)),
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    (
        LiveSender {
            shared: Arc::clone(&shared),
        },
        LiveReceiver { shared },
    )
}

impl LiveSender {
    /// Enqueue a packet, evicting the oldest pending one when full.
    /// Never blocks.
    pub fn offer(&self, packet: Packet) {
        let evicted = self.shared.queue.lock().push(packet);
        if evicted.is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("station.live.packets_dropped").increment(1);
            tracing::debug!("live queue full, dropped oldest packet");
        }
        self.shared.notify.notify_one();
    }

    /// Packets evicted unseen since the queue was created.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Packets currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

impl Drop for LiveSender {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl LiveReceiver {
    /// Wait for the next packet. Returns `None` once the sender is gone
    /// and the queue has drained.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.try_recv() {
                return Some(packet);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            // notify_one stores a permit when no receiver is parked yet,
            // so an offer between try_recv and here is not lost.
            self.shared.notify.notified().await;
        }
    }

    /// Take the oldest pending packet without waiting.
    pub fn try_recv(&mut self) -> Option<Packet> {
        self.shared.queue.lock().pop()
    }
}

/// Snapshot of the live station state: last reading, chart series, and
/// activity log. What an attached display renders each refresh tick.
pub struct LiveView {
    last: Option<Packet>,
    series: Ring<f32>,
    log: Ring<String>,
}

impl LiveView {
    pub fn new(series_capacity: usize, log_capacity: usize) -> Self {
        Self {
            last: None,
            series: Ring::with_capacity(series_capacity),
            log: Ring::with_capacity(log_capacity),
        }
    }

    /// Fold one packet into the view: remember it, chart its vertical
    /// acceleration, and log a one-line summary.
    pub fn apply(&mut self, packet: Packet) {
        self.series.push(packet.acceleration[2] as f32);
        self.log.push(format!(
            "{} Lat:{:.6} Lon:{:.6} Sat:{} AccZ:{:.2}",
            packet.time,
            packet.latitude,
            packet.longitude,
            packet.satellites,
            packet.acceleration[2],
        ));
        self.last = Some(packet);
    }

    /// Append a free-form line to the activity log.
    pub fn note(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Drain every packet currently pending on the receiver into the
    /// view. Returns how many were applied.
    pub fn drain(&mut self, rx: &mut LiveReceiver) -> usize {
        let mut applied = 0;
        while let Some(packet) = rx.try_recv() {
            self.apply(packet);
            applied += 1;
        }
        applied
    }

    pub fn last_packet(&self) -> Option<&Packet> {
        self.last.as_ref()
    }

    /// Chart samples, oldest first.
    pub fn series(&self) -> Vec<f32> {
        self.series.iter().copied().collect()
    }

    /// Log lines, oldest first.
    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log.iter().map(String::as_str)
    }

    /// Seed the chart from historical samples, oldest first.
    pub fn seed_series<I: IntoIterator<Item = f32>>(&mut self, samples: I) {
        for sample in samples {
            self.series.push(sample);
        }
    }

    /// Reset the chart and log. The last reading stays so the display
    /// keeps showing current position.
    pub fn clear(&mut self) {
        self.series.clear();
        self.log.clear();
    }
}

impl Default for LiveView {
    fn default() -> Self {
        Self::new(SERIES_CAPACITY, LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_packet(satellites: u32) -> Packet {
        Packet {
            time: "12:00:00".to_string(),
            latitude: 54.1,
            longitude: 25.2,
            satellites,
            acceleration: [0.1, -0.2, 0.3],
        }
    }

    #[test]
    fn test_ring_push_and_iter_in_order() {
        let mut ring = Ring::with_capacity(4);
        for value in 1..=3 {
            assert!(ring.push(value).is_none());
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(ring.latest(), Some(&3));
    }

    #[test]
    fn test_ring_evicts_oldest_when_full() {
        let mut ring = Ring::with_capacity(3);
        for value in 1..=3 {
            ring.push(value);
        }
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_ring_len_never_exceeds_capacity() {
        let mut ring = Ring::with_capacity(7);
        for value in 0..1000 {
            ring.push(value);
            assert!(ring.len() <= ring.capacity());
        }
        assert_eq!(ring.len(), 7);
        assert_eq!(
            ring.iter().copied().collect::<Vec<_>>(),
            (993..1000).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_ring_pop_is_fifo_across_wrap() {
        let mut ring = Ring::with_capacity(3);
        for value in 1..=5 {
            ring.push(value);
        }
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        ring.push(6);
        assert_eq!(ring.pop(), Some(5));
        assert_eq!(ring.pop(), Some(6));
        assert_eq!(ring.pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_clear() {
        let mut ring = Ring::with_capacity(3);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
        ring.push(9);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn test_live_buffer_drops_oldest_when_full() {
        let (tx, mut rx) = live_buffer(4);
        for satellites in 0..6 {
            tx.offer(create_test_packet(satellites));
        }
        assert_eq!(tx.dropped(), 2);
        assert_eq!(tx.pending(), 4);

        let mut received = Vec::new();
        while let Some(packet) = rx.try_recv() {
            received.push(packet.satellites);
        }
        assert_eq!(received, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_live_buffer_recv_sees_offered_packet() {
        let (tx, mut rx) = live_buffer(8);
        tx.offer(create_test_packet(7));
        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.satellites, 7);
    }

    #[tokio::test]
    async fn test_live_buffer_recv_wakes_on_offer() {
        let (tx, mut rx) = live_buffer(8);
        let receiver = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        tx.offer(create_test_packet(3));
        let packet = receiver.await.unwrap().unwrap();
        assert_eq!(packet.satellites, 3);
    }

    #[tokio::test]
    async fn test_live_buffer_recv_returns_none_after_sender_drop() {
        let (tx, mut rx) = live_buffer(4);
        tx.offer(create_test_packet(1));
        drop(tx);
        assert_eq!(rx.recv().await.unwrap().satellites, 1);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_view_trims_series_and_log() {
        let mut view = LiveView::new(3, 2);
        for satellites in 0..5 {
            view.apply(create_test_packet(satellites));
        }
        assert_eq!(view.series().len(), 3);
        assert_eq!(view.log_lines().count(), 2);
        assert_eq!(view.last_packet().unwrap().satellites, 4);
    }

    #[test]
    fn test_view_log_line_format() {
        let mut view = LiveView::default();
        view.apply(create_test_packet(9));
        let line = view.log_lines().next().unwrap();
        assert_eq!(line, "12:00:00 Lat:54.100000 Lon:25.200000 Sat:9 AccZ:0.30");
    }

    #[test]
    fn test_view_clear_keeps_last_packet() {
        let mut view = LiveView::default();
        view.apply(create_test_packet(5));
        view.note("COM PORT opened");
        view.clear();
        assert!(view.series().is_empty());
        assert_eq!(view.log_lines().count(), 0);
        assert_eq!(view.last_packet().unwrap().satellites, 5);
    }

    #[test]
    fn test_view_seed_series() {
        let mut view = LiveView::new(3, 2);
        view.seed_series([0.1, 0.2, 0.3, 0.4]);
        assert_eq!(view.series(), vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_view_drain_applies_all_pending() {
        let (tx, mut rx) = live_buffer(8);
        for satellites in 0..3 {
            tx.offer(create_test_packet(satellites));
        }
        let mut view = LiveView::default();
        assert_eq!(view.drain(&mut rx), 3);
        assert_eq!(view.series().len(), 3);
        assert!(rx.try_recv().is_none());
    }
}
