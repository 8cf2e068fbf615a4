// CSV / JSON encoding of output rows. Both formats carry the same field names.
use std::io::{Read, Write};
use std::path::Path;

use crate::error::SinkError;
use crate::persist::types::{OutputFormat, OutputRecord, CSV_HEADER};

/// Stream `records` into `out`. I/O errors are reported against `dest`, the
/// file the bytes are bound for.
pub fn encode(
    records: &[OutputRecord],
    format: OutputFormat,
    out: &mut dyn Write,
    dest: &Path,
) -> Result<(), SinkError> {
    match format {
        OutputFormat::Csv => encode_csv(records, out, dest),
        OutputFormat::Json => encode_json(records, out, dest),
    }
}

pub fn decode<R: Read>(input: R, format: OutputFormat) -> Result<Vec<OutputRecord>, SinkError> {
    match format {
        OutputFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
            let header = reader.headers().map_err(|e| SinkError::Decode(e.to_string()))?;
            if header.iter().ne(CSV_HEADER) {
                return Err(SinkError::Decode(format!("unexpected csv header: {header:?}")));
            }
            reader
                .deserialize()
                .collect::<Result<Vec<OutputRecord>, _>>()
                .map_err(|e| SinkError::Decode(e.to_string()))
        }
        OutputFormat::Json => serde_json::from_reader(input).map_err(|e| SinkError::Decode(e.to_string())),
    }
}

// Header is written by hand so an empty file still carries it
fn encode_csv(records: &[OutputRecord], out: &mut dyn Write, dest: &Path) -> Result<(), SinkError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(CSV_HEADER).map_err(|e| csv_error(e, dest))?;
    for record in records {
        writer.serialize(record).map_err(|e| csv_error(e, dest))?;
    }
    writer.flush().map_err(|e| SinkError::write(dest, e))
}

fn encode_json(records: &[OutputRecord], out: &mut dyn Write, dest: &Path) -> Result<(), SinkError> {
    serde_json::to_writer_pretty(&mut *out, records).map_err(|e| json_error(e, dest))?;
    out.write_all(b"\n").map_err(|e| SinkError::write(dest, e))
}

fn csv_error(err: csv::Error, dest: &Path) -> SinkError {
    if !err.is_io_error() {
        return SinkError::Encode(err.to_string());
    }
    match err.into_kind() {
        csv::ErrorKind::Io(io) => SinkError::write(dest, io),
        other => SinkError::Encode(format!("{other:?}")),
    }
}

fn json_error(err: serde_json::Error, dest: &Path) -> SinkError {
    if err.is_io() {
        SinkError::write(dest, err.into())
    } else {
        SinkError::Encode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn rows() -> Vec<OutputRecord> {
        vec![
            OutputRecord {
                timestamp: Utc.with_ymd_and_hms(2025, 12, 16, 9, 0, 0).unwrap(),
                symbol: "NASDAQ:AAPL".into(),
                price: Decimal::from_str("178.5").unwrap(),
                volume: Some(1200),
            },
            OutputRecord {
                timestamp: Utc.with_ymd_and_hms(2025, 12, 16, 9, 1, 0).unwrap(),
                symbol: "NASDAQ:AAPL".into(),
                price: Decimal::from_str("178.60").unwrap(),
                volume: None,
            },
        ]
    }

    fn encoded(records: &[OutputRecord], format: OutputFormat) -> String {
        let mut buf = Vec::new();
        encode(records, format, &mut buf, Path::new("out")).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn csv_layout() {
        assert_eq!(
            encoded(&rows(), OutputFormat::Csv),
            "timestamp,symbol,price,volume\n\
             2025-12-16T09:00:00Z,NASDAQ:AAPL,178.5,1200\n\
             2025-12-16T09:01:00Z,NASDAQ:AAPL,178.60,\n"
        );
    }

    #[test]
    fn empty_csv_still_has_header() {
        assert_eq!(encoded(&[], OutputFormat::Csv), "timestamp,symbol,price,volume\n");
        assert!(decode(encoded(&[], OutputFormat::Csv).as_bytes(), OutputFormat::Csv).unwrap().is_empty());
    }

    #[test]
    fn json_uses_same_field_names_and_null_volume() {
        let json: serde_json::Value = serde_json::from_str(&encoded(&rows(), OutputFormat::Json)).unwrap();
        assert_eq!(json[0]["timestamp"], "2025-12-16T09:00:00Z");
        assert_eq!(json[0]["symbol"], "NASDAQ:AAPL");
        assert_eq!(json[0]["price"], "178.5");
        assert_eq!(json[0]["volume"], 1200);
        assert!(json[1]["volume"].is_null());
    }

    #[test]
    fn csv_and_json_read_back_identically() {
        let original = rows();
        let from_csv = decode(encoded(&original, OutputFormat::Csv).as_bytes(), OutputFormat::Csv).unwrap();
        let from_json = decode(encoded(&from_csv, OutputFormat::Json).as_bytes(), OutputFormat::Json).unwrap();
        assert_eq!(from_csv, original);
        assert_eq!(from_json, original);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encoded(&rows(), OutputFormat::Json), encoded(&rows(), OutputFormat::Json));
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn io_failure_mid_write_is_a_write_failure() {
        for format in [OutputFormat::Csv, OutputFormat::Json] {
            let err = encode(&rows(), format, &mut FullDisk, Path::new("/data/quotes.csv")).unwrap_err();
            match err {
                SinkError::WriteFailure { path, source } => {
                    assert_eq!(path, Path::new("/data/quotes.csv"));
                    assert!(source.to_string().contains("no space"), "{source}");
                }
                other => panic!("{format}: expected write failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = decode("ts,sym,px,vol\n".as_bytes(), OutputFormat::Csv).unwrap_err();
        assert!(matches!(err, SinkError::Decode(_)));
    }
}
