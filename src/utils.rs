//! Small time helpers shared by the persistence and pipeline modules.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Panics only if the system clock
/// is set before 1970, which `SystemTime::now()` never reports.
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_time_millis_is_positive_and_increasing() {
        let a = current_time_millis();
        let b = current_time_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
