use crate::error::{EngineError, Result};
use csv::{ReaderBuilder, StringRecord};
use kline_shared::models::Bar;
use std::io::Read;

// Timestamp encodings found in cached exchange history.
pub mod timestamp_format {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    /// Epoch values with at most 10 digits are seconds, anything longer is milliseconds.
    pub fn from_epoch(value: i64) -> i64 {
        if value.abs() < 10_000_000_000 {
            value * 1000
        } else {
            value
        }
    }

    /// Parses a textual timestamp into epoch milliseconds (UTC). Accepts epoch digits,
    /// RFC 3339, and the dash-separated cache format `YYYY-MM-DD[-HH[-MM]]`.
    pub fn parse(s: &str) -> Option<i64> {
        let s = s.trim();
        if let Ok(epoch) = s.parse::<i64>() {
            return Some(from_epoch(epoch));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.timestamp_millis());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d-%H-%M") {
            return Some(dt.and_utc().timestamp_millis());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{}-00", s), "%Y-%m-%d-%H-%M") {
            return Some(dt.and_utc().timestamp_millis());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_epoch_millis_and_seconds() {
            assert_eq!(parse("1704067200000"), Some(1_704_067_200_000));
            assert_eq!(parse("1704067200"), Some(1_704_067_200_000));
        }

        #[test]
        fn test_parse_rfc3339() {
            assert_eq!(parse("2024-01-01T00:05:00Z"), Some(1_704_067_500_000));
            assert_eq!(parse("2024-01-01T08:05:00+08:00"), Some(1_704_067_500_000));
        }

        #[test]
        fn test_parse_dash_format() {
            assert_eq!(parse("2024-01-01"), Some(1_704_067_200_000));
            assert_eq!(parse("2024-01-01-04"), Some(1_704_081_600_000));
            assert_eq!(parse("2024-01-01-00-05"), Some(1_704_067_500_000));
        }

        #[test]
        fn test_parse_invalid() {
            assert_eq!(parse("yesterday"), None);
            assert_eq!(parse("2024-13-01"), None);
        }
    }
}

pub struct HistoryCsvParser;

impl HistoryCsvParser {
    // CSV Header: timestamp,open,high,low,close,volume
    // Example Row: 1704067200000,42283.5,42300.1,42250.0,42290.2,12.834
    pub fn parse_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
        let mut rdr = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let mut bars = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let line = idx + 2;
            let record = result?;

            let timestamp_str = Self::required(&record, &headers, "timestamp", line)?;
            let timestamp = timestamp_format::parse(timestamp_str).ok_or_else(|| {
                EngineError::HistoryFormat(format!("Invalid timestamp '{}' at line {}", timestamp_str, line))
            })?;

            bars.push(Bar {
                timestamp,
                open: Self::number(&record, &headers, "open", line)?,
                high: Self::number(&record, &headers, "high", line)?,
                low: Self::number(&record, &headers, "low", line)?,
                close: Self::number(&record, &headers, "close", line)?,
                volume: Self::number(&record, &headers, "volume", line)?,
            });
        }
        Ok(bars)
    }

    fn required<'a>(record: &'a StringRecord, headers: &StringRecord, name: &str, line: usize) -> Result<&'a str> {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
            .and_then(|pos| record.get(pos))
            .ok_or_else(|| EngineError::HistoryFormat(format!("Missing '{}' field at line {}", name, line)))
    }

    fn number(record: &StringRecord, headers: &StringRecord, name: &str, line: usize) -> Result<f64> {
        let raw = Self::required(record, headers, name, line)?;
        raw.parse::<f64>()
            .map_err(|e| EngineError::HistoryFormat(format!("Error parsing '{}' at line {}: {}", name, line, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{BufReader, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_parse_bars_from_file() {
        let csv_content = "\
timestamp,open,high,low,close,volume
1704067200000,42283.5,42300.1,42250.0,42290.2,12.834
2024-01-01-00-05,42290.2,42310.0,42280.0,42305.5,8.5";
        let tmp_file = create_test_csv(csv_content);
        let bars = HistoryCsvParser::parse_bars(BufReader::new(File::open(tmp_file.path()).unwrap())).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], Bar::new(1_704_067_200_000, 42283.5, 42300.1, 42250.0, 42290.2, 12.834));
        assert_eq!(bars[1].timestamp, 1_704_067_500_000);
        assert_eq!(bars[1].close, 42305.5);
    }

    #[test]
    fn test_columns_are_matched_by_name() {
        let csv_content = "\
volume,close,low,high,open,timestamp
1.0,11.0,9.0,12.0,10.0,1704067200";
        let bars = HistoryCsvParser::parse_bars(csv_content.as_bytes()).unwrap();
        assert_eq!(bars, vec![Bar::new(1_704_067_200_000, 10.0, 12.0, 9.0, 11.0, 1.0)]);
    }

    #[test]
    fn test_parse_bars_header_only() {
        let tmp_file = create_test_csv("timestamp,open,high,low,close,volume");
        let bars = HistoryCsvParser::parse_bars(BufReader::new(File::open(tmp_file.path()).unwrap())).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_missing_field() {
        let csv_content = "\
timestamp,open,high,low,close
1704067200000,1,2,0.5,1.5";
        let err = HistoryCsvParser::parse_bars(csv_content.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Missing 'volume' field"));
    }

    #[test]
    fn test_invalid_number() {
        let csv_content = "\
timestamp,open,high,low,close,volume
1704067200000,invalid,2,0.5,1.5,3";
        let err = HistoryCsvParser::parse_bars(csv_content.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Error parsing 'open' at line 2"));
    }
}
