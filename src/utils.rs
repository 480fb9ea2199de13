use chrono::{SecondsFormat, Utc};

pub struct Utils;

impl Utils {
    /// Current time as an ISO-8601 UTC string. All catalog timestamps use
    /// this format.
    pub fn now_iso() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Format a byte count for CLI output.
    pub fn format_size(size: Option<i64>) -> String {
        let size = match size {
            Some(s) => s,
            None => return "-".to_string(),
        };

        if size < 1024 {
            return format!("{size} B");
        }

        let mut fsize = size as f64;
        for unit in ["KB", "MB", "GB", "TB"] {
            fsize /= 1024.0;
            if fsize < 1024.0 {
                return format!("{fsize:.1} {unit}");
            }
        }
        format!("{fsize:.1} PB")
    }
}
