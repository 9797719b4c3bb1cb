//! Human-readable rendering of sizes and remaining time.

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
const MIB: f64 = 1024.0 * 1024.0;

/// Format a byte count using base-1024 units, e.g. `1.5 KB`, `2 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{} {}", trim_decimals(value), UNITS[unit])
}

/// Format an ETA in seconds as `42s` or `3m 5s`. Empty when unknown or zero.
pub fn format_eta(seconds: Option<u64>) -> String {
    match seconds {
        None | Some(0) => String::new(),
        Some(secs) if secs < 60 => format!("{secs}s"),
        Some(secs) => format!("{}m {}s", secs / 60, secs % 60),
    }
}

/// Size limit wording used in rejection messages, e.g. `50MB`.
pub(crate) fn format_bytes_whole_mb(bytes: u64) -> String {
    format!("{}MB", trim_decimals(bytes as f64 / MIB))
}

fn trim_decimals(value: f64) -> String {
    let rendered = format!("{value:.2}");
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_the_largest_whole_unit() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn eta_renders_minutes_and_seconds() {
        assert_eq!(format_eta(None), "");
        assert_eq!(format_eta(Some(0)), "");
        assert_eq!(format_eta(Some(42)), "42s");
        assert_eq!(format_eta(Some(185)), "3m 5s");
    }

    #[test]
    fn whole_megabytes() {
        assert_eq!(format_bytes_whole_mb(50 * 1024 * 1024), "50MB");
        assert_eq!(format_bytes_whole_mb(1024 * 1024 + 512 * 1024), "1.5MB");
    }
}
