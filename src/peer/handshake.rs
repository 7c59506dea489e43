//! Version handshake utilities.

use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

/// Gets the current Unix timestamp (seconds since January 1, 1970 00:00:00 UTC).
///
/// # Panics
///
/// If the system clock is set to a time before the Unix epoch
/// (January 1, 1970), which is extremely unlikely on modern systems.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before the Unix epoch")
        .as_secs() as i64
}

/// Generates a 64-bit nonce for ping and version messages.
///
/// Creates a reasonably unique nonce without requiring a `rand` crate.
/// While *not* cryptographically secure, it is sufficient for correlating
/// pongs and for the handshake nonce field.
pub fn generate_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_nanos() as u64;

    // Mix in the process ID for additional entropy.
    let pid = process::id() as u64;

    now ^ pid.rotate_left(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonces_vary() {
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..16 {
            nonces.insert(generate_nonce());
            std::thread::sleep(std::time::Duration::from_micros(2));
        }
        assert!(nonces.len() > 1);
    }

    #[test]
    fn test_timestamp_is_recent() {
        // Sometime after 2023.
        assert!(unix_timestamp() > 1_600_000_000);
    }
}
