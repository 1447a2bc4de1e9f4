//! Bluetooth MAC address helpers.

/// Strict check used before any connect attempt: six upper-case hex pairs
/// separated by colons, e.g. `00:11:22:AA:BB:CC`.
pub fn is_valid_address(addr: &str) -> bool {
    let bytes = addr.as_bytes();
    if bytes.len() != 17 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| {
        if i % 3 == 2 {
            b == b':'
        } else {
            matches!(b, b'0'..=b'9' | b'A'..=b'F')
        }
    })
}

/// Canonical `XX:XX:XX:XX:XX:XX` form for display and lookups. Accepts any
/// separator and case; the last twelve hex digits win. Returns the trimmed,
/// upper-cased input when fewer than twelve hex digits are present.
pub fn normalize_address(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    let mut hex: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() < 12 {
        return s.to_ascii_uppercase();
    }
    if hex.len() > 12 {
        hex = hex[hex.len() - 12..].to_string();
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}
