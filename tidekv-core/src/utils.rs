//! # Common Utilities
//!
//! Small helpers shared across tidekv crates.

/// Format bytes in human readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.log2() / 10.0).floor() as usize;
    let unit_index = exp.min(UNITS.len() - 1);
    let size = bytes_f64 / (1024_f64).powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else if size >= 100.0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else if size >= 10.0 {
        format!("{:.1} {}", size, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Render a key for logs and the CLI: UTF-8 as-is, anything else as hex
pub fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) if !s.chars().any(|c| c.is_control()) => s.to_string(),
        _ => {
            let mut out = String::with_capacity(2 + key.len() * 2);
            out.push_str("0x");
            for b in key {
                out.push_str(&format!("{:02x}", b));
            }
            out
        }
    }
}
