// src/prediction/risk.rs
use crate::error::PredictionError;
use crate::models::NivelRiesgo;

/// Ordered band tiers, evaluated high-to-low so the closed/open boundaries
/// cannot overlap. First matching tier wins; anything below the last floor is
/// BAJO.
const BAND_TIERS: [(f64, NivelRiesgo); 3] = [
    (0.75, NivelRiesgo::Critico),
    (0.50, NivelRiesgo::Alto),
    (0.25, NivelRiesgo::Medio),
];

/// Maps a breach probability to its risk band. Pure and total over [0, 1];
/// values outside the range (NaN included) are rejected rather than clamped,
/// since a correctly calibrated classifier never produces them.
pub fn band(probability: f64) -> Result<NivelRiesgo, PredictionError> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(PredictionError::OutOfRange(probability));
    }
    for (floor, nivel) in BAND_TIERS {
        if probability >= floor {
            return Ok(nivel);
        }
    }
    Ok(NivelRiesgo::Bajo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries_partition_the_unit_interval() {
        assert_eq!(band(0.75).unwrap(), NivelRiesgo::Critico);
        assert_eq!(band(0.7499).unwrap(), NivelRiesgo::Alto);
        assert_eq!(band(0.50).unwrap(), NivelRiesgo::Alto);
        assert_eq!(band(0.4999).unwrap(), NivelRiesgo::Medio);
        assert_eq!(band(0.25).unwrap(), NivelRiesgo::Medio);
        assert_eq!(band(0.2499).unwrap(), NivelRiesgo::Bajo);
        assert_eq!(band(0.0).unwrap(), NivelRiesgo::Bajo);
        assert_eq!(band(1.0).unwrap(), NivelRiesgo::Critico);
    }

    #[test]
    fn test_every_probability_gets_exactly_one_band() {
        // Sweep the interval; the tiers must leave no gap.
        for i in 0..=1000 {
            let p = i as f64 / 1000.0;
            band(p).unwrap();
        }
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        assert!(matches!(
            band(1.2),
            Err(PredictionError::OutOfRange(p)) if (p - 1.2).abs() < 1e-9
        ));
        assert!(matches!(band(-0.01), Err(PredictionError::OutOfRange(_))));
        assert!(matches!(band(f64::NAN), Err(PredictionError::OutOfRange(_))));
    }
}
