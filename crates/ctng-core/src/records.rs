//! Convergence records dumped at the end of an experiment.

use serde::{Deserialize, Serialize};

/// One row of the per-monitor dump: how one issuer's agreement run went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub monitor_id: String,
    pub entity_id: String,
    /// `"Logger"` or `"CA"`.
    pub entity_type: String,
    /// Seconds from FSM start to threshold signature; zero when the quorum
    /// was never reached.
    pub converge_time: f64,
    /// Human-readable inbound traffic, e.g. `"1.21 MB"`.
    pub traffic: String,
    pub update_count: u64,
}

/// Render a byte count the way the dump file expects it.
pub fn format_traffic(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    match bytes {
        b if b >= TB => format!("{:.2} TB", b as f64 / TB as f64),
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{b} bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_magnitude() {
        assert_eq!(format_traffic(512), "512 bytes");
        assert_eq!(format_traffic(2048), "2.00 KB");
        assert_eq!(format_traffic(3 * 1024 * 1024 / 2), "1.50 MB");
        assert_eq!(format_traffic(5 * 1024 * 1024 * 1024), "5.00 GB");
    }
}
