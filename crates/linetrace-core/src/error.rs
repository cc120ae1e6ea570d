//! Pipeline errors

use thiserror::Error;

/// Errors raised by the batch pipeline and the dataset loaders
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON read or write failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input rejected before processing
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Timestamp cell in no accepted format
    #[error("Unparseable timestamp '{0}'")]
    BadTimestamp(String),

    /// Required CSV column absent
    #[error("Missing column '{0}' in telemetry file")]
    MissingColumn(String),

    /// Vehicle has no events for a required channel
    #[error("Vehicle {vehicle}: no events for channel '{channel}'")]
    MissingChannel {
        /// Vehicle identifier
        vehicle: String,
        /// Channel label
        channel: String,
    },

    /// Too few rows left to process a vehicle
    #[error("Vehicle {vehicle}: insufficient data ({rows} rows, need {required})")]
    InsufficientData {
        /// Vehicle identifier
        vehicle: String,
        /// Rows available
        rows: usize,
        /// Rows needed
        required: usize,
    },

    /// Too few complete laps for a per-car line
    #[error("Vehicle {vehicle}: only {found} usable laps, need {required}")]
    InsufficientLaps {
        /// Vehicle identifier
        vehicle: String,
        /// Usable laps found
        found: usize,
        /// Laps needed
        required: usize,
    },

    /// No racing line point survived filtering
    #[error("Racing line is empty: {0}")]
    EmptyRacingLine(String),

    /// Canonical line could not be built
    #[error("Canonical line failed: {0}")]
    Canonical(String),

    /// Trajectory file does not start with the magic bytes
    #[error("Trajectory file: bad magic bytes")]
    BadMagic,

    /// Trajectory file version newer than this reader
    #[error("Trajectory file: unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Trajectory file column count with no known layout
    #[error("Trajectory file: unsupported column layout ({0} columns)")]
    UnsupportedLayout(u16),

    /// Trajectory values do not match the stored checksum
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Stored checksum
        expected: u32,
        /// Checksum of the values read
        actual: u32,
    },

    /// Every vehicle was skipped
    #[error("No vehicles processed successfully. Check input file format.")]
    NoVehicles,

    /// Dataset id not in the registry
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// Pipeline worker panicked or was cancelled
    #[error("Background job failed: {0}")]
    Job(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_vehicle() {
        let err = PipelineError::InsufficientLaps {
            vehicle: "GR86-004-13".to_string(),
            found: 2,
            required: 3,
        };
        assert_eq!(
            err.to_string(),
            "Vehicle GR86-004-13: only 2 usable laps, need 3"
        );

        let err = PipelineError::CrcMismatch {
            expected: 0xdead_beef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "CRC mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }
}
