/// Human-readable byte count (B, KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Gigabytes with at most two decimals, trailing zeros dropped
pub fn format_gb(gb: f64) -> String {
    let text = format!("{:.2}", gb);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() {
        "0GB".to_string()
    } else {
        format!("{}GB", text)
    }
}
