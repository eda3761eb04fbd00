//! Utility module for serde of types.

use serde::{Deserialize, Serialize};

/// Struct used to (de-)serialize the summary of a single accepted trial, one row per trial in the
/// sweep's CSV file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrialSummary {
    /// Human-readable formatted timestamp when the trial was accepted
    pub execution_timestamp: String,
    /// Label of the trial, encoding the algorithm and all sweep parameters
    pub label: String,
    /// Name of the recovery algorithm under test
    pub algorithm: String,
    /// Index of the trial in the sweep
    pub trial: usize,
    /// `single` or `multiple`
    pub failure_mode: String,
    /// Link-health sequence, encoded as `0;1;2;1;0`
    pub pattern: String,
    /// Failed link(s), encoded as `s1-s2;s3-s4`
    pub failed_links: String,
    /// Number of flows traversing the failed link(s)
    pub num_affected_flows: usize,
    /// Number of schedule steps that mutated the fabric
    pub change_counter: usize,
    /// Number of attempts it took until the trial was accepted
    pub attempts: usize,
    /// Overall duration of the accepted attempt in seconds
    pub execution_duration: f64,
    /// Timestamp of the first transition
    #[serde(default)]
    pub first_change: f64,
}

impl TrialSummary {
    /// Append the summary to the CSV file at `path`, writing the header if the file is new.
    pub fn append_to(&self, path: impl AsRef<std::path::Path>) -> Result<(), csv::Error> {
        let path = path.as_ref();
        let has_headers = !path.exists() || std::fs::metadata(path)?.len() == 0;
        let mut csv = csv::WriterBuilder::new()
            .has_headers(has_headers)
            .from_writer(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            );
        csv.serialize(self)?;
        csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn summary(trial: usize) -> TrialSummary {
        TrialSummary {
            execution_timestamp: "2024-11-12_18-00-44".to_string(),
            label: format!("DRAF_20_35_1000_10_1_20_30_{trial}"),
            algorithm: "DRAF".to_string(),
            trial,
            failure_mode: "single".to_string(),
            pattern: "0;1;2;1;0".to_string(),
            failed_links: "s2-s3".to_string(),
            num_affected_flows: 4,
            change_counter: 5,
            attempts: 1,
            execution_duration: 42.0,
            first_change: 1731434444.142341,
        }
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        summary(1).append_to(&path).unwrap();
        summary(2).append_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("execution_timestamp,label,"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<TrialSummary> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![summary(1), summary(2)]);
    }
}
