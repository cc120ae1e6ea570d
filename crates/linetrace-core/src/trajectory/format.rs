//! Binary trajectory files
//!
//! Layout, little-endian:
//!
//! | field | type |
//! |---|---|
//! | magic | `b"LTRJ"` |
//! | format version | u16 |
//! | column count | u16 |
//! | row count | u32 |
//! | values | `rows * columns` f64, row-major |
//! | CRC-32 of the value bytes | u32 |

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::info;

use super::migration::{migrate, MigrationReport, TrajectoryLayout};
use super::{Trajectory, TrajectoryRow};
use crate::error::{PipelineError, Result};

/// File magic
pub const MAGIC: &[u8; 4] = b"LTRJ";

/// Current format version
pub const FORMAT_VERSION: u16 = 1;

/// Trajectory sample period assumed by the file format
const SAMPLE_RATE_MS: u32 = 10;

/// Encode raw row-major values with the given column count
pub fn encode_columns(columns: u16, values: &[f64]) -> Result<Vec<u8>> {
    let rows = values.len() / columns.max(1) as usize;
    let mut body = Vec::with_capacity(values.len() * 8);
    for v in values {
        body.write_f64::<LittleEndian>(*v)?;
    }

    let mut out = Vec::with_capacity(body.len() + 16);
    out.write_all(MAGIC)?;
    out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    out.write_u16::<LittleEndian>(columns)?;
    out.write_u32::<LittleEndian>(rows as u32)?;
    out.write_all(&body)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
    Ok(out)
}

/// Encode a trajectory in the current layout
pub fn encode(trajectory: &Trajectory) -> Result<Vec<u8>> {
    let values: Vec<f64> = trajectory.rows.iter().flat_map(|r| r.to_array()).collect();
    encode_columns(TrajectoryRow::COLUMNS as u16, &values)
}

/// Decode a trajectory file, migrating legacy layouts
pub fn decode(vehicle_id: &str, bytes: &[u8]) -> Result<(Trajectory, MigrationReport)> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PipelineError::BadMagic);
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(PipelineError::UnsupportedVersion(version));
    }
    let columns = cursor.read_u16::<LittleEndian>()?;
    let layout = TrajectoryLayout::from_columns(columns)?;
    let rows = cursor.read_u32::<LittleEndian>()? as usize;

    let body_start = cursor.position() as usize;
    let body_len = rows * columns as usize * 8;
    let body = bytes
        .get(body_start..body_start + body_len)
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated trajectory body")
        })?;
    cursor.set_position((body_start + body_len) as u64);
    let expected = cursor.read_u32::<LittleEndian>()?;
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(PipelineError::CrcMismatch { expected, actual });
    }

    let mut values = vec![0.0; rows * columns as usize];
    Cursor::new(body).read_f64_into::<LittleEndian>(&mut values)?;
    let (rows, report) = migrate(layout, &values);
    Ok((Trajectory::new(vehicle_id, SAMPLE_RATE_MS, rows), report))
}

/// Write a trajectory file
pub fn write_trajectory<P: AsRef<Path>>(path: P, trajectory: &Trajectory) -> Result<()> {
    let bytes = encode(trajectory)?;
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

/// Read a trajectory file; the vehicle id is the file stem
pub fn read_trajectory<P: AsRef<Path>>(path: P) -> Result<Trajectory> {
    let path = path.as_ref();
    let vehicle_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let bytes = fs::read(path)?;
    let (trajectory, report) = decode(&vehicle_id, &bytes)?;
    if report.has_changes() {
        info!("Trajectory {}: {}", vehicle_id, report.summary());
    }
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Trajectory {
        let rows = (0..25)
            .map(|i| TrajectoryRow {
                x: i as f64 * 0.5,
                y: 3.0,
                lapdist: i as f64,
                brake_rear: 0.25,
                lap: 1.0,
                ..Default::default()
            })
            .collect();
        Trajectory::new("GR86-004-78", 10, rows)
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GR86-004-78.traj");
        let traj = sample();
        write_trajectory(&path, &traj).unwrap();
        assert_eq!(read_trajectory(&path).unwrap(), traj);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[20] ^= 0xff;
        assert!(matches!(
            decode("car", &bytes),
            Err(PipelineError::CrcMismatch { .. })
        ));

        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode("car", &bytes), Err(PipelineError::BadMagic)));

        let bytes = encode(&sample()).unwrap();
        assert!(decode("car", &bytes[..bytes.len() - 10]).is_err());
    }

    #[test]
    fn test_legacy_file_is_migrated() {
        let values = [0.0, 0.0, 20.0, 5.0, 0.8, 2.0, 1.0, 0.0, 0.5, 1.0];
        let bytes = encode_columns(10, &values).unwrap();
        let (traj, report) = decode("car", &bytes).unwrap();
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.rows[0].brake_front, 0.8);
        assert_eq!(traj.rows[0].brake_rear, 0.8);
        assert_eq!(report.source_layout, TrajectoryLayout::SingleBrake10);
    }
}
