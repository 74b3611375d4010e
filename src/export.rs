//! Snapshot export to flat files.
//!
//! Reads the current table snapshot through [`PacketStore::list`] and
//! writes it out as CSV or pretty-printed JSON. File names embed the
//! generation second; two exports of the same format within one second
//! collide, which is the caller's scheduling concern.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::ExportConfig;
use crate::store::{PacketStore, StoreError, StoredPacket};

/// Errors that can occur while exporting.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store read failed: {0}")]
    Store(#[from] StoreError),

    #[error("file write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown export format {value:?}, expected csv or json")]
    UnknownFormat { value: String },
}

/// Target file format for an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::UnknownFormat {
                value: other.to_string(),
            }),
        }
    }
}

const CSV_HEADER: [&str; 10] = [
    "ID",
    "Time",
    "Latitude",
    "Longitude",
    "Satellites",
    "AccelerationX",
    "AccelerationY",
    "AccelerationZ",
    "CreatedAt",
    "UpdatedAt",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Writes store snapshots into a target directory.
pub struct Exporter {
    store: Arc<PacketStore>,
    dir: PathBuf,
    prefix: String,
}

impl Exporter {
    pub fn new(store: Arc<PacketStore>, config: &ExportConfig) -> Self {
        Self {
            store,
            dir: PathBuf::from(&config.dir),
            prefix: config.prefix.clone(),
        }
    }

    /// Export the newest `limit` packets (`limit <= 0` exports all) and
    /// return the path written.
    #[instrument(skip(self))]
    pub async fn export(
        &self,
        format: ExportFormat,
        limit: i64,
    ) -> Result<PathBuf, ExportError> {
        let packets = self.store.list(limit).await?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(export_filename(&self.prefix, Local::now(), format));

        match format {
            ExportFormat::Csv => write_csv(&path, &packets)?,
            ExportFormat::Json => write_json(&path, &packets)?,
        }

        info!(path = %path.display(), rows = packets.len(), %format, "export written");
        metrics::counter!("station.export.files_written").increment(1);

        Ok(path)
    }
}

fn export_filename(prefix: &str, at: DateTime<Local>, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Fixed column order, header always present. Coordinates keep 6 decimal
/// places, acceleration 3.
fn write_csv(path: &Path, packets: &[StoredPacket]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADER)?;

    for packet in packets {
        writer.write_record([
            packet.id.to_string(),
            packet.time.clone(),
            format!("{:.6}", packet.latitude),
            format!("{:.6}", packet.longitude),
            packet.satellites.to_string(),
            format!("{:.3}", packet.acceleration_x),
            format!("{:.3}", packet.acceleration_y),
            format!("{:.3}", packet.acceleration_z),
            packet.created_at.format(TIMESTAMP_FORMAT).to_string(),
            packet.updated_at.format(TIMESTAMP_FORMAT).to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// One self-describing object per packet; zero rows produce `[]`.
fn write_json(path: &Path, packets: &[StoredPacket]) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, packets)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn create_test_stored_packet(id: u64) -> StoredPacket {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        StoredPacket {
            id,
            time: "12:00:00".to_string(),
            latitude: 54.1,
            longitude: 25.2,
            satellites: 9,
            acceleration_x: 0.1,
            acceleration_y: -0.2,
            acceleration_z: 0.3,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_csv_zero_rows_is_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_csv(&path, &[]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "ID,Time,Latitude,Longitude,Satellites,AccelerationX,AccelerationY,AccelerationZ,CreatedAt,UpdatedAt\n"
        );
    }

    #[test]
    fn test_csv_row_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        write_csv(&path, &[create_test_stored_packet(1)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "1,12:00:00,54.100000,25.200000,9,0.100,-0.200,0.300,2024-06-01 12:00:00,2024-06-01 12:00:00"
        );
    }

    #[test]
    fn test_json_zero_rows_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        write_json(&path, &[]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), "[]");
    }

    #[test]
    fn test_json_round_trips_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let packets = vec![create_test_stored_packet(1), create_test_stored_packet(2)];
        write_json(&path, &packets).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let decoded: Vec<StoredPacket> = serde_json::from_str(&content).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_export_filename_embeds_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 6, 1, 9, 5, 3).unwrap();
        assert_eq!(
            export_filename("telemetry", at, ExportFormat::Csv),
            "telemetry_20240601_090503.csv"
        );
        assert_eq!(
            export_filename("run7", at, ExportFormat::Json),
            "run7_20240601_090503.json"
        );
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("Json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat { .. })
        ));
    }
}
