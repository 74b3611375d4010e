//! Telemetry Station
//!
//! Capture service for GPS/IMU field units. The station reads the units'
//! line protocol from a serial port, decodes each line into a packet,
//! keeps a bounded live view for real-time display, and persists every
//! packet to MySQL with CSV/JSON export of the stored history.
//!
//! ## Features
//!
//! - **Tolerant Line Decoding**: Semicolon-delimited tagged fields with
//!   unknown tags skipped, matching the deployed firmware's permissive
//!   wire format
//! - **Drop-Oldest Live Buffer**: A slow or detached display never stalls
//!   the serial read loop; the buffer evicts its oldest packet instead
//! - **Fire-and-Forget Persistence**: Each packet is inserted from its own
//!   task so a slow database never blocks ingestion
//! - **Snapshot Export**: Stored history written out as CSV or pretty
//!   JSON with timestamped file names
//!
//! ## Architecture
//!
//! ```text
//! Serial Device            Live Path                  Durable Path
//! ┌──────────────┐        ┌──────────────┐           ┌──────────────┐
//! │ /dev/ttyUSB0 │───────▶│ Ingest Loop  │──spawn──▶ │ Packet Store │
//! └──────────────┘  lines │ (decode)     │  insert   │ (MySQL)      │
//!                         └──────────────┘           └──────────────┘
//!                                │                          │
//!                          offer │ drop-oldest              │ list
//!                                ▼                          ▼
//!                         ┌──────────────┐           ┌──────────────┐
//!                         │ Live Buffer  │           │ Exporter     │
//!                         │ + Live View  │           │ (CSV / JSON) │
//!                         └──────────────┘           └──────────────┘
//! ```

pub mod config;
pub mod export;
pub mod ingest;
pub mod live;
pub mod packet;
pub mod store;
pub mod transport;

pub use config::StationConfig;
pub use export::{ExportError, ExportFormat, Exporter};
pub use ingest::{IngestLoop, IngestStats};
pub use live::{live_buffer, LiveReceiver, LiveSender, LiveView};
pub use packet::{decode_line, encode_line, DecodeError, Packet};
pub use store::{PacketStore, ScalarField, StoreError, StoredPacket};
pub use transport::{available_ports, open_serial, TransportError};
