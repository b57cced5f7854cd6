// Small numeric helpers shared by the engine and any UI consumer.

/// Rounds half away from zero to `decimals` places, the way prices are shown on the dashboard.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Percent change from `from` to `to`; `0.0` when `from` is zero.
pub fn percent_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    (to - from) / from * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_two_places() {
        assert_eq!(round_to(102.346, 2), 102.35);
        assert_eq!(round_to(-1.005, 0), -1.0);
        assert_eq!(round_to(7.0, 2), 7.0);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(100.0, 105.0), 5.0);
        assert_eq!(percent_change(0.0, 5.0), 0.0);
    }
}
