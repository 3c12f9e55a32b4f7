// src/prediction/factors.rs
use crate::models::FeatureVector;

/// Elapsed-time tiers over `percent_used`, highest severity first. Strict
/// comparison: 90% of the time consumed is "crítico", not "casi agotado".
const TIME_TIERS: [(f64, &str); 3] = [
    (90.0, "Tiempo casi agotado (>90%)"),
    (75.0, "Tiempo crítico (>75%)"),
    (50.0, "Más de la mitad del tiempo consumido (>50%)"),
];

/// Probability tiers, inclusive floors.
const PROBABILITY_TIERS: [(f64, &str); 2] = [
    (0.8, "Alta probabilidad histórica de incumplimiento"),
    (0.6, "Probabilidad media-alta de incumplimiento"),
];

/// Derives the human-readable risk factors for one scored solicitud. Within
/// each category the first matching tier wins; an empty list is a valid
/// output for a low-elapsed, low-probability request.
pub fn explain(features: &FeatureVector, probability: f64) -> Vec<String> {
    let mut factores = Vec::with_capacity(2);
    let percent_used = features.percent_used();

    if let Some((_, label)) = TIME_TIERS.iter().find(|(floor, _)| percent_used > *floor) {
        factores.push(label.to_string());
    }
    if let Some((_, label)) = PROBABILITY_TIERS
        .iter()
        .find(|(floor, _)| probability >= *floor)
    {
        factores.push(label.to_string());
    }

    factores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(days_elapsed: f64, threshold_days: f64) -> FeatureVector {
        FeatureVector {
            days_elapsed,
            threshold_days,
            role_id: 1,
        }
    }

    #[test]
    fn test_time_critical_plus_high_probability() {
        // 28/35 = 80% used: above 75 but not above 90, so "crítico".
        let factores = explain(&vector(28.0, 35.0), 0.85);
        assert_eq!(
            factores,
            vec![
                "Tiempo crítico (>75%)".to_string(),
                "Alta probabilidad histórica de incumplimiento".to_string(),
            ]
        );
    }

    #[test]
    fn test_time_tiers_are_mutually_exclusive() {
        assert_eq!(
            explain(&vector(95.0, 100.0), 0.0),
            vec!["Tiempo casi agotado (>90%)".to_string()]
        );
        // Exactly 90% is not > 90.
        assert_eq!(
            explain(&vector(90.0, 100.0), 0.0),
            vec!["Tiempo crítico (>75%)".to_string()]
        );
        assert_eq!(
            explain(&vector(60.0, 100.0), 0.0),
            vec!["Más de la mitad del tiempo consumido (>50%)".to_string()]
        );
        // Exactly 50% is not > 50.
        assert!(explain(&vector(50.0, 100.0), 0.0).is_empty());
    }

    #[test]
    fn test_probability_tiers() {
        assert_eq!(
            explain(&vector(0.0, 100.0), 0.8),
            vec!["Alta probabilidad histórica de incumplimiento".to_string()]
        );
        assert_eq!(
            explain(&vector(0.0, 100.0), 0.6),
            vec!["Probabilidad media-alta de incumplimiento".to_string()]
        );
        assert!(explain(&vector(0.0, 100.0), 0.59).is_empty());
    }

    #[test]
    fn test_scale_invariance_of_elapsed_factors() {
        let a = explain(&vector(28.0, 35.0), 0.1);
        let b = explain(&vector(4.0, 5.0), 0.1);
        assert_eq!(a, b);
        assert_eq!(a, vec!["Tiempo crítico (>75%)".to_string()]);
    }

    #[test]
    fn test_empty_output_is_valid_for_calm_requests() {
        assert!(explain(&vector(1.0, 30.0), 0.05).is_empty());
    }
}
