use chrono::Duration;

/// Retry delay after the `attempts`-th consecutive failure.
///
/// 1 → 1 min, 2 → 5 min, 3 → 15 min, 4 → 1 h, 5+ → 6 h. Zero is treated as
/// the first failure.
pub fn retry_delay(attempts: u32) -> Duration {
    match attempts {
        0 | 1 => Duration::minutes(1),
        2 => Duration::minutes(5),
        3 => Duration::minutes(15),
        4 => Duration::hours(1),
        _ => Duration::hours(6),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::retry_delay;

    #[test]
    fn steps_match_schedule() {
        let expected = [
            Duration::minutes(1),
            Duration::minutes(5),
            Duration::minutes(15),
            Duration::hours(1),
            Duration::hours(6),
        ];

        for (attempts, expected) in (1..=5).zip(expected) {
            assert_eq!(retry_delay(attempts), expected, "attempt {attempts}");
        }
    }

    #[test]
    fn delay_is_non_decreasing_and_capped() {
        let delays: Vec<Duration> = (0..=12).map(retry_delay).collect();

        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(retry_delay(u32::MAX), Duration::hours(6));
    }
}
