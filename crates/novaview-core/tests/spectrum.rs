mod common;

use novaview_core::config::SpectrumSettings;
use novaview_core::dsp::spectrum::{dequantize, SpectrumProcessor};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn settings() -> SpectrumSettings {
    SpectrumSettings::default()
}

#[test]
fn dequantizes_known_scenario() {
    let t0 = Instant::now();
    let mut proc = SpectrumProcessor::new(settings(), t0);
    let payload = common::spectrum(vec![0, 128, 255, 64], -120.0, 0.5);
    let out = proc.ingest_at(&payload, t0);
    assert_eq!(out.db, &[-120.0, -56.0, 7.5, -88.0]);
    assert!(out.resized);
}

#[test]
fn averaging_converges_monotonically() {
    let t0 = Instant::now();
    let mut s = settings();
    s.averaging = 4;
    let mut proc = SpectrumProcessor::new(s, t0);

    // Prime at -120 dB, then feed a constant -60 dB.
    proc.ingest_at(&common::spectrum(vec![0; 8], -120.0, 0.5), t0);
    let target = -60.0;
    let mut prev = -120.0;
    for _ in 0..60 {
        let out = proc.ingest_at(&common::spectrum(vec![120; 8], -120.0, 0.5), t0);
        let v = out.db[3];
        assert!(v >= prev, "average went backwards: {prev} -> {v}");
        assert!(v <= target + 1e-9);
        prev = v;
    }
    assert!((prev - target).abs() < 1e-6);
    assert_eq!(proc.instantaneous()[0], target);
}

#[test]
fn max_hold_holds_and_min_hold_waits_for_settle() {
    let t0 = Instant::now();
    let mut s = settings();
    s.max_hold = true;
    s.min_hold = true;
    let mut proc = SpectrumProcessor::new(s, t0);

    proc.ingest_at(&common::spectrum(vec![100, 100], 0.0, -1.0), t0);
    // During settle the min tracks the raw samples directly.
    proc.ingest_at(&common::spectrum(vec![120, 80], 0.0, -1.0), t0 + Duration::from_millis(500));
    let out = proc.ingest_at(&common::spectrum(vec![90, 90], 0.0, -1.0), t0 + Duration::from_secs(1));
    assert_eq!(out.min_hold.unwrap(), &[-90.0, -90.0]);
    assert_eq!(out.max_hold.unwrap(), &[-90.0, -80.0]);

    let later = t0 + Duration::from_secs(3);
    proc.ingest_at(&common::spectrum(vec![110, 95], 0.0, -1.0), later);
    let out = proc.ingest_at(&common::spectrum(vec![100, 100], 0.0, -1.0), later);
    assert_eq!(out.min_hold.unwrap(), &[-110.0, -100.0]);
    assert_eq!(out.max_hold.unwrap(), &[-90.0, -80.0]);
}

#[test]
fn bin_count_change_resets_holds() {
    let t0 = Instant::now();
    let mut s = settings();
    s.averaging = 10;
    let mut proc = SpectrumProcessor::new(s, t0);
    proc.ingest_at(&common::spectrum(vec![0; 4], -100.0, 1.0), t0);
    let out = proc.ingest_at(&common::spectrum(vec![50; 6], -100.0, 1.0), t0);
    assert!(out.resized);
    assert_eq!(out.db, &[-50.0; 6]);
    assert_eq!(proc.hold().average.len(), 6);
}

#[test]
fn non_finite_dequantization_constants_fall_back_to_previous() {
    let t0 = Instant::now();
    let mut proc = SpectrumProcessor::new(settings(), t0);
    proc.ingest_at(&common::spectrum(vec![10], -100.0, 2.0), t0);
    let out = proc.ingest_at(&common::spectrum(vec![20], f32::NAN, f32::INFINITY), t0);
    assert_eq!(out.db, &[-60.0]);

    let mut bad = common::spectrum(vec![20], -100.0, 2.0);
    bad.noise_density_dbm = f32::NAN;
    proc.ingest_at(&bad, t0);
    assert_eq!(proc.rf_status().noise_density_dbm.get(), Some(-165.0));
}

#[test]
fn autoscale_runs_on_new_geometry_and_on_request() {
    let t0 = Instant::now();
    let mut proc = SpectrumProcessor::new(settings(), t0);
    let mut bins = vec![40u8; 200];
    bins[150] = 160;
    // offset -120, gain 0.5: floor -100, peak -40.
    let out = proc.ingest_at(&common::spectrum(bins.clone(), -120.0, 0.5), t0);
    let range = out.range.expect("first frame autoscales");
    assert_eq!(range.max_db, -35.0);
    assert_eq!(range.min_db, -100.0);
    assert!(range.wf_min_db < range.min_db);
    assert_eq!(range.wf_max_db, range.max_db);

    let out = proc.ingest_at(&common::spectrum(bins.clone(), -120.0, 0.5), t0);
    assert!(out.range.is_none());

    proc.request_autoscale();
    assert!(proc.autoscale_pending());
    let out = proc.ingest_at(&common::spectrum(bins, -120.0, 0.5), t0);
    assert!(out.range.is_some());
    assert!(!proc.autoscale_pending());
}

#[test]
fn autoscale_keeps_range_when_tuned_bin_is_off_screen() {
    let t0 = Instant::now();
    let mut proc = SpectrumProcessor::new(settings(), t0);
    let before = proc.range();
    let mut payload = common::spectrum(vec![40; 200], -120.0, 0.5);
    // 100 bins below center puts the tuned bin at index 0.
    payload.tuned_hz = payload.center_hz - 100 * payload.bin_width_hz;
    let out = proc.ingest_at(&payload, t0);
    assert_eq!(out.tuned_bin, Some(0));
    assert!(out.range.is_none());
    assert_eq!(proc.range(), before);

    let empty = common::spectrum(Vec::new(), -120.0, 0.5);
    let out = proc.ingest_at(&empty, t0);
    assert!(out.range.is_none());
    assert_eq!(proc.range(), before);
}

#[test]
fn manual_range_rejects_inverted_bounds() {
    let mut proc = SpectrumProcessor::new(settings(), Instant::now());
    assert!(!proc.set_range(-20.0, -30.0));
    assert!(!proc.set_range(f64::NAN, 0.0));
    assert!(proc.set_range(-110.0, -30.0));
    assert_eq!(proc.range().min_db, -110.0);
}

proptest! {
    #[test]
    fn prop_dequantization_is_linear(
        raw in proptest::collection::vec(any::<u8>(), 0..64),
        offset in -200.0f32..50.0,
        gain in -2.0f32..2.0,
    ) {
        let mut raw = raw;
        raw.extend_from_slice(&[0, 255]);
        let mut out = Vec::new();
        dequantize(&raw, offset, gain, &mut out);
        prop_assert_eq!(out.len(), raw.len());
        for (db, r) in out.iter().zip(&raw) {
            prop_assert_eq!(*db, f64::from(offset) + f64::from(gain) * f64::from(*r));
        }
    }
}
