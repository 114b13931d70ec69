//! Serial normalisation. Network serials show up as `localhost:5555`,
//! `127.0.0.1:5555` or `[::1]:5555` depending on who printed them.

const LOOPBACK_PREFIXES: [&str; 5] = ["localhost:", "127.0.0.1:", "0.0.0.0:", "[::1]:", "[::]:"];

pub fn normalize_adb_addr(addr: &str) -> String {
    let addr = addr.trim();
    let lower = addr.to_ascii_lowercase();
    for prefix in LOOPBACK_PREFIXES {
        if let Some(port) = lower.strip_prefix(prefix) {
            return format!("localhost:{port}");
        }
    }
    addr.to_string()
}

pub fn normalize_serial(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.contains(':') {
        return normalize_adb_addr(trimmed);
    }
    trimmed.to_string()
}

/// Serials are case-sensitive; only loopback address spellings are folded.
pub fn same_serial(a: &str, b: &str) -> bool {
    let a = normalize_serial(a);
    !a.is_empty() && a == normalize_serial(b)
}
