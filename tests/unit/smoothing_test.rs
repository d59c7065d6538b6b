//! Incline and elevation smoothing.

use ridelink::metrics::geo::equator_degrees_for;
use ridelink::metrics::smoothing::{ElevationFilter, InclineConfig, InclineFilter, InclineMode};
use ridelink::recording::types::LocationFix;

fn fix_at(meters_east: f64, altitude: f64) -> LocationFix {
    LocationFix {
        latitude: 0.0,
        longitude: equator_degrees_for(meters_east),
        altitude,
        speed: None,
        timestamp_ms: 0,
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_incline_needs_a_full_window() {
    let mut filter = InclineFilter::new(InclineConfig::default());
    for n in 0..9 {
        assert_eq!(filter.push(&fix_at(n as f64 * 20.0, n as f64 * 2.0)), 0.0);
    }
    // Halves centred at 40 m / 4 m and 140 m / 14 m
    assert_close(filter.push(&fix_at(180.0, 18.0)), 10.0);
}

#[test]
fn test_incline_over_short_run_is_zero() {
    let mut filter = InclineFilter::new(InclineConfig::default());
    let mut incline = f64::NAN;
    for n in 0..10 {
        let (x, alt) = if n < 5 { (0.0, 100.0) } else { (9.5, 105.0) };
        incline = filter.push(&fix_at(x, alt));
    }
    assert_eq!(incline, 0.0);
}

#[test]
fn test_incline_descending_is_negative() {
    let mut filter = InclineFilter::new(InclineConfig::default());
    let mut incline = 0.0;
    for n in 0..10 {
        incline = filter.push(&fix_at(n as f64 * 10.0, 50.0 - n as f64 * 0.5));
    }
    assert_close(incline, -5.0);
}

#[test]
fn test_incline_window_evicts_oldest_fix() {
    let mut filter = InclineFilter::new(InclineConfig::default());

    filter.push(&fix_at(0.0, 200.0));
    for _ in 0..5 {
        filter.push(&fix_at(0.0, 100.0));
    }
    let mut incline = 0.0;
    for _ in 0..4 {
        incline = filter.push(&fix_at(100.0, 110.0));
    }
    // First half averages 120 m, second half sits 80 m further at 108 m
    assert_close(incline, -15.0);
    assert_eq!(filter.len(), 10);

    // The 200 m outlier drops out
    assert_close(filter.push(&fix_at(100.0, 110.0)), 10.0);
    assert_eq!(filter.len(), 10);
}

#[test]
fn test_incline_endpoints_mode() {
    let mut filter = InclineFilter::new(InclineConfig {
        window: 5,
        mode: InclineMode::Endpoints,
        ..InclineConfig::default()
    });

    assert_eq!(filter.push(&fix_at(0.0, 0.0)), 0.0);
    assert_close(filter.push(&fix_at(20.0, 2.0)), 10.0);

    for n in 2..8 {
        filter.push(&fix_at(n as f64 * 20.0, 2.0));
    }
    assert_eq!(filter.len(), 5);
    // Every fix still held is flat
    assert_eq!(filter.push(&fix_at(160.0, 2.0)), 0.0);
}

#[test]
fn test_incline_reset_empties_window() {
    let mut filter = InclineFilter::new(InclineConfig::default());
    for n in 0..10 {
        filter.push(&fix_at(n as f64 * 20.0, n as f64));
    }
    filter.reset();
    assert!(filter.is_empty());
    assert_eq!(filter.push(&fix_at(200.0, 10.0)), 0.0);
}

#[test]
fn test_window_below_two_is_raised() {
    let filter = InclineFilter::new(InclineConfig {
        window: 0,
        ..InclineConfig::default()
    });
    assert_eq!(filter.config().window, 2);
}

#[test]
fn test_flat_altitude_never_gains() {
    let mut filter = ElevationFilter::default();
    for _ in 0..100 {
        let delta = filter.update(42.0);
        assert_eq!(delta.gain, 0.0);
        assert_eq!(delta.loss, 0.0);
    }
}

#[test]
fn test_first_batch_only_sets_baseline() {
    let mut filter = ElevationFilter::new(5);
    for alt in [100.0, 150.0, 200.0, 250.0, 300.0] {
        let delta = filter.update(alt);
        assert_eq!(delta.gain + delta.loss, 0.0);
    }
}

#[test]
fn test_gain_and_loss_are_exclusive() {
    let mut filter = ElevationFilter::new(2);
    filter.update(10.0);
    filter.update(20.0);

    filter.update(30.0);
    let up = filter.update(40.0);
    assert_eq!(up.gain, 20.0);
    assert_eq!(up.loss, 0.0);

    filter.update(0.0);
    let down = filter.update(10.0);
    assert_eq!(down.gain, 0.0);
    assert_eq!(down.loss, 30.0);
}

#[test]
fn test_net_change_matches_batch_averages() {
    let mut filter = ElevationFilter::new(5);
    let mut seed: u32 = 12345;
    let mut readings = Vec::new();
    for _ in 0..50 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        readings.push(100.0 + (seed >> 16) as f64 % 40.0);
    }

    let (mut gain, mut loss) = (0.0, 0.0);
    for &alt in &readings {
        let delta = filter.update(alt);
        assert!(delta.gain >= 0.0 && delta.loss >= 0.0);
        gain += delta.gain;
        loss += delta.loss;
    }

    let first = readings[..5].iter().sum::<f64>() / 5.0;
    let last = readings[45..].iter().sum::<f64>() / 5.0;
    assert!((gain - loss - (last - first)).abs() < 1e-9);
}

#[test]
fn test_elevation_reset_drops_baseline() {
    let mut filter = ElevationFilter::new(1);
    filter.update(100.0);
    assert_eq!(filter.update(110.0).gain, 10.0);

    filter.reset();
    assert_eq!(filter.update(150.0).gain, 0.0);
    assert_eq!(filter.update(151.0).gain, 1.0);
}
