use serde::{Deserialize, Serialize};

use super::types::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub probability: i32,
    pub expected_revenue: f64,
}

/// `value * probability / 100`, rounded to cents.
///
/// Probability is clamped to 0..=100 and non-finite or negative values count as zero,
/// so the result is always a finite, non-negative amount.
pub fn expected_revenue(value: f64, probability: i32) -> f64 {
    let probability = probability.clamp(0, 100);
    let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
    round_cents(value * f64::from(probability) / 100.0)
}

pub fn forecast(value: f64, probability: i32) -> Forecast {
    Forecast {
        probability: probability.clamp(0, 100),
        expected_revenue: expected_revenue(value, probability),
    }
}

pub fn forecast_for_stage(value: f64, stage: &Stage) -> Forecast {
    forecast(value, stage.probability)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_revenue_weights_value() {
        assert_eq!(expected_revenue(1000.0, 40), 400.0);
        assert_eq!(expected_revenue(5000.0, 50), 2500.0);
        assert_eq!(expected_revenue(1000.0, 100), 1000.0);
        assert_eq!(expected_revenue(1000.0, 0), 0.0);
    }

    #[test]
    fn test_expected_revenue_rounds_to_cents() {
        assert_eq!(expected_revenue(333.33, 33), 110.0);
        assert_eq!(expected_revenue(10.01, 15), 1.5);
    }

    #[test]
    fn test_expected_revenue_guards_inputs() {
        assert_eq!(expected_revenue(-50.0, 40), 0.0);
        assert_eq!(expected_revenue(f64::NAN, 40), 0.0);
        assert_eq!(expected_revenue(f64::INFINITY, 40), 0.0);
        assert_eq!(expected_revenue(200.0, 150), 200.0);
        assert_eq!(expected_revenue(200.0, -10), 0.0);
    }

    #[test]
    fn test_forecast_clamps_probability() {
        let f = forecast(100.0, 120);
        assert_eq!(f.probability, 100);
        assert_eq!(f.expected_revenue, 100.0);
    }
}
