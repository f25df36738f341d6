//! CSV report writer: one file per network and era.

use crate::schemas::{EraIndex, ValidatorEraRecord};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

pub const CSV_HEADER: [&str; 9] = [
    "era",
    "name",
    "stash_address",
    "controller_address",
    "commission_percent",
    "self_stake",
    "total_stake",
    "num_stakers",
    "era_points",
];

/// Commission is stored in parts per billion; this maps it to hundredths of
/// a percent before rounding.
const COMMISSION_DIVISOR: u64 = 10_000_000;

#[derive(Error, Debug)]
pub enum CsvExportError {
    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to flush {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn csv_file_name(network: &str, era: EraIndex) -> String {
    format!("{}_validators_era_{}.csv", network, era)
}

/// Percent with two decimals, rounded half-up: `50000000` -> `"5.00"`
pub fn format_commission_percent(commission: u32) -> String {
    let step = COMMISSION_DIVISOR / 100;
    let hundredths = (commission as u64 + step / 2) / step;
    format!("{}.{:02}", hundredths / 100, hundredths % 100)
}

fn row(record: &ValidatorEraRecord) -> [String; 9] {
    [
        record.era.to_string(),
        record.display_name.clone(),
        record.validator_address.clone(),
        record.controller_address.clone(),
        format_commission_percent(record.commission),
        record.exposure.own.to_string(),
        record.exposure.total.to_string(),
        record.exposure.others.len().to_string(),
        record.era_points.to_string(),
    ]
}

/// Write the header and every row. A failed row does not stop the rows
/// after it; the first error is returned once all have been attempted.
fn write_rows<W: io::Write>(
    writer: &mut csv::Writer<W>,
    records: &[ValidatorEraRecord],
) -> Result<(), csv::Error> {
    let mut first_error = None;
    for fields in std::iter::once(CSV_HEADER.map(str::to_string)).chain(records.iter().map(row)) {
        if let Err(err) = writer.write_record(&fields) {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Write `records` to `<export_dir>/<network>_validators_era_<era>.csv`,
/// replacing any existing file. The file is flushed and closed even when a
/// row fails to write.
pub fn write_era_csv(
    export_dir: &Path,
    network: &str,
    era: EraIndex,
    records: &[ValidatorEraRecord],
) -> Result<PathBuf, CsvExportError> {
    let path = export_dir.join(csv_file_name(network, era));

    let file = File::create(&path).map_err(|source| {
        error!("Cannot create {}: {}", path.display(), source);
        CsvExportError::Create {
            path: path.clone(),
            source,
        }
    })?;

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(file);

    let written = write_rows(&mut writer, records);
    let flushed = writer.flush();
    drop(writer);

    if let Err(source) = written {
        error!("Error writing {}: {}", path.display(), source);
        return Err(CsvExportError::Write { path, source });
    }
    if let Err(source) = flushed {
        error!("Error flushing {}: {}", path.display(), source);
        return Err(CsvExportError::Flush { path, source });
    }

    debug!("Wrote {} rows to {}", records.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Exposure;

    fn record() -> ValidatorEraRecord {
        ValidatorEraRecord {
            era: 100,
            validator_address: "V1".to_string(),
            controller_address: "C1".to_string(),
            display_name: "Val1".to_string(),
            era_points: 250,
            exposure: Exposure {
                own: 1000,
                total: 5000,
                others: vec![("N1".to_string(), 4000)],
            },
            commission: 100_000_000,
            slashes: Vec::new(),
        }
    }

    #[test]
    fn test_format_commission_percent() {
        assert_eq!(format_commission_percent(50_000_000), "5.00");
        assert_eq!(format_commission_percent(123_456_789), "12.35");
        assert_eq!(format_commission_percent(0), "0.00");
        assert_eq!(format_commission_percent(1_000_000_000), "100.00");
        assert_eq!(format_commission_percent(49_999), "0.00");
        assert_eq!(format_commission_percent(50_000), "0.01");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(csv_file_name("kusama", 100), "kusama_validators_era_100.csv");
    }

    #[test]
    fn test_write_era_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut empty = record();
        empty.validator_address = "V2".to_string();
        empty.controller_address = String::new();
        empty.display_name = String::new();
        empty.exposure = Exposure::default();
        empty.commission = 0;
        empty.era_points = 0;

        let path = write_era_csv(dir.path(), "kusama", 100, &[record(), empty]).unwrap();
        assert_eq!(path, dir.path().join("kusama_validators_era_100.csv"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "era,name,stash_address,controller_address,commission_percent,self_stake,total_stake,num_stakers,era_points\n\
             100,Val1,V1,C1,10.00,1000,5000,1,250\n\
             100,,V2,,0.00,0,0,0,0\n"
        );
    }

    #[test]
    fn test_empty_era_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_era_csv(dir.path(), "polkadot", 3, &[]).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("era,name,"));
    }

    /// Sink whose every write fails, counting the attempts
    #[derive(Default)]
    struct BrokenSink {
        attempts: usize,
    }

    impl io::Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_row_errors_do_not_stop_later_rows() {
        // tiny buffer so every record reaches the sink
        let mut writer = WriterBuilder::new()
            .buffer_capacity(8)
            .from_writer(BrokenSink::default());

        let result = write_rows(&mut writer, &[record(), record()]);

        assert!(result.is_err());
        // header plus both rows were attempted
        assert!(writer.get_ref().attempts >= 3);
    }

    #[test]
    fn test_missing_directory_is_create_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = write_era_csv(&missing, "kusama", 1, &[record()]).unwrap_err();
        assert!(matches!(err, CsvExportError::Create { .. }));
        assert!(!missing.exists());
    }
}
