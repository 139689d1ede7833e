//! Parses a PostGIS `POINT Z` EWKB hex string into an integer nanometer
//! triple (spec.md §4.3: "Points must be converted from the database's
//! spatial representation to an integer triple before leaving this
//! layer"). SPEC_FULL.md §13 grounds this on the original's
//! `get_geom_from_wkb` helper (`materializationengine/utils.py`, not in
//! the retrieval pack's file list but imported throughout
//! `spatial_lookup.py`/`ingest_new_annotations.py`), which decodes the
//! same EWKB payload via `shapely.wkb.loads`.

use data_types::Point3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("EWKB hex string has odd length")]
    OddLength,
    #[error("EWKB payload too short for a POINT Z")]
    Truncated,
    #[error("unsupported EWKB byte order byte: {0:#x}")]
    UnsupportedByteOrder(u8),
    #[error("EWKB geometry type {0:#x} is not a point")]
    NotAPoint(u32),
    #[error("EWKB point is missing the Z ordinate")]
    MissingZ,
}

const WKB_Z_FLAG: u32 = 0x8000_0000;
const WKB_SRID_FLAG: u32 = 0x2000_0000;
const WKB_TYPE_MASK: u32 = 0x0000_00ff;
const WKB_POINT_TYPE: u32 = 1;

/// Decodes a `POINT Z` (optionally with SRID) EWKB hex string, returning
/// the nanometer position truncated to an integer triple.
pub fn from_ewkb_hex(hex: &str) -> Result<Point3<i64>, Error> {
    let bytes = decode_hex(hex)?;
    if bytes.len() < 5 {
        return Err(Error::Truncated);
    }

    let little_endian = match bytes[0] {
        0 => false,
        1 => true,
        other => return Err(Error::UnsupportedByteOrder(other)),
    };
    let type_word = read_u32(&bytes[1..5], little_endian);

    if type_word & WKB_TYPE_MASK != WKB_POINT_TYPE {
        return Err(Error::NotAPoint(type_word));
    }
    if type_word & WKB_Z_FLAG == 0 {
        return Err(Error::MissingZ);
    }

    let mut offset = 5;
    if type_word & WKB_SRID_FLAG != 0 {
        offset += 4;
    }

    if bytes.len() < offset + 24 {
        return Err(Error::Truncated);
    }

    let x = read_f64(&bytes[offset..offset + 8], little_endian);
    let y = read_f64(&bytes[offset + 8..offset + 16], little_endian);
    let z = read_f64(&bytes[offset + 16..offset + 24], little_endian);

    Ok(Point3::new(x as i64, y as i64, z as i64))
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, Error> {
    if hex.len() % 2 != 0 {
        return Err(Error::OddLength);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| Error::Truncated))
        .collect()
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let arr: [u8; 4] = bytes.try_into().expect("caller ensures 4-byte slice");
    if little_endian {
        u32::from_le_bytes(arr)
    } else {
        u32::from_be_bytes(arr)
    }
}

fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    let arr: [u8; 8] = bytes.try_into().expect("caller ensures 8-byte slice");
    if little_endian {
        f64::from_le_bytes(arr)
    } else {
        f64::from_be_bytes(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_point_z_le(x: f64, y: f64, z: f64) -> String {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(WKB_Z_FLAG | WKB_POINT_TYPE).to_le_bytes());
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&z.to_le_bytes());
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn round_trips_s1_point() {
        let hex = encode_point_z_le(10.0, 20.0, 30.0);
        let point = from_ewkb_hex(&hex).unwrap();
        assert_eq!(point, Point3::new(10, 20, 30));
    }

    #[test]
    fn rejects_non_point_geometry() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(WKB_Z_FLAG | 2u32).to_le_bytes()); // linestring
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(from_ewkb_hex(&hex), Err(Error::NotAPoint(WKB_Z_FLAG | 2)));
    }

    #[test]
    fn rejects_missing_z() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&WKB_POINT_TYPE.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&2.0f64.to_le_bytes());
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(from_ewkb_hex(&hex), Err(Error::MissingZ));
    }
}
