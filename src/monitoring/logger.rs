use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use crate::estimation::EstimateError;

/// Append-only CSV record of every estimate attempt.
pub struct CsvLogger {
    file: Mutex<File>,
}

impl CsvLogger {
    pub fn new(log_path: &str) -> Result<Self> {
        let path = Path::new(log_path);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        if is_new {
            writeln!(file, "timestamp,event_id,model_id,probability,status,error")?;
        }

        Ok(Self { file: Mutex::new(file) })
    }

    /// Log the result of one (event, model) task
    pub fn log_estimate(
        &self,
        event_id: &str,
        model_id: &str,
        result: &Result<f64, EstimateError>,
    ) -> Result<()> {
        let (probability, status, error) = match result {
            Ok(p) => (format!("{:.4}", p), "ok", String::new()),
            Err(e) => (String::new(), "error", e.to_string()),
        };

        writeln!(
            self.file.lock(),
            "{},{},{},{},{},{}",
            Utc::now().to_rfc3339(),
            csv_field(event_id),
            csv_field(model_id),
            probability,
            status,
            csv_field(&error)
        )?;

        Ok(())
    }
}

/// Quote a field if it contains a delimiter, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
