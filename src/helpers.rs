//! Shared unit conversions and small wave math.
//!
//! Source APIs report metric values (°C, km/h, m, hPa); the store keeps the
//! imperial units the product displays (°F, mph, ft, inHg). Conversions pass
//! `Option` through so absent readings stay absent.

/// Convert Celsius to Fahrenheit.
pub(crate) fn celsius_to_fahrenheit(c: Option<f64>) -> Option<f64> {
    c.map(|v| v * 9.0 / 5.0 + 32.0)
}

/// Convert km/h to mph.
pub(crate) fn kmh_to_mph(kmh: Option<f64>) -> Option<f64> {
    kmh.map(|v| v * 0.621_371)
}

/// Convert metres to feet.
pub(crate) fn meters_to_feet(m: Option<f64>) -> Option<f64> {
    m.map(|v| v * 3.280_84)
}

/// Convert hectopascals to inches of mercury.
pub(crate) fn hpa_to_inhg(hpa: Option<f64>) -> Option<f64> {
    hpa.map(|v| v * 0.029_53)
}

/// Wave energy index from height (ft) and period (s).
///
/// Calibrated two-point fit weighting period over height, so a small
/// long-period groundswell scores comparably to a large wind swell:
/// roughly 100 at 2 ft @ 20 s and 50 at 11 ft @ 8 s.
pub(crate) fn wave_energy_index(height_ft: Option<f64>, period_s: Option<f64>) -> Option<i32> {
    let (h, t) = (height_ft?, period_s?);
    if !h.is_finite() || !t.is_finite() {
        return None;
    }
    const K1: f64 = 0.129_233; // H * T^2 term
    const K2: f64 = -0.042_33; // H^2 * T term
    let score = K1 * h * t * t + K2 * h * h * t;
    Some(score.max(0.0).round() as i32)
}

/// Normalise a surf height range so `min <= max` and both are at least 1 ft.
pub(crate) fn normalize_surf_range(min_ft: f64, max_ft: f64) -> (f64, f64) {
    let min_ft = min_ft.max(1.0);
    let max_ft = max_ft.max(1.0);
    if min_ft > max_ft {
        (max_ft, min_ft)
    } else {
        (min_ft, max_ft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(Some(0.0)), Some(32.0));
        assert_eq!(celsius_to_fahrenheit(Some(100.0)), Some(212.0));
        assert_eq!(celsius_to_fahrenheit(None), None);
    }

    #[test]
    fn test_kmh_to_mph() {
        let mph = kmh_to_mph(Some(100.0)).unwrap();
        assert!((mph - 62.1371).abs() < 1e-3);
    }

    #[test]
    fn test_meters_to_feet() {
        let ft = meters_to_feet(Some(2.0)).unwrap();
        assert!((ft - 6.56168).abs() < 1e-4);
    }

    #[test]
    fn test_hpa_to_inhg() {
        let inhg = hpa_to_inhg(Some(1013.25)).unwrap();
        assert!((inhg - 29.92).abs() < 0.01);
    }

    #[test]
    fn test_wave_energy_calibration_anchors() {
        // ~100 at 2 ft @ 20 s, ~50 at 11 ft @ 8 s
        let long_period = wave_energy_index(Some(2.0), Some(20.0)).unwrap();
        assert!((95..=110).contains(&long_period), "got {}", long_period);

        let wind_swell = wave_energy_index(Some(11.0), Some(8.0)).unwrap();
        assert!((45..=55).contains(&wind_swell), "got {}", wind_swell);
    }

    #[test]
    fn test_wave_energy_missing_inputs() {
        assert_eq!(wave_energy_index(None, Some(10.0)), None);
        assert_eq!(wave_energy_index(Some(3.0), None), None);
    }

    #[test]
    fn test_wave_energy_never_negative() {
        // Large height with short period can drive the H^2 term negative
        let e = wave_energy_index(Some(30.0), Some(4.0)).unwrap();
        assert!(e >= 0);
    }

    #[test]
    fn test_normalize_surf_range() {
        assert_eq!(normalize_surf_range(2.0, 4.0), (2.0, 4.0));
        assert_eq!(normalize_surf_range(4.0, 2.0), (2.0, 4.0));
        assert_eq!(normalize_surf_range(0.2, 0.5), (1.0, 1.0));
    }
}
