use groundlink::{ChannelCondition, ErrorCorrectionMode, LdpcConfig, LdpcEngine};
use std::time::Duration;

const BUDGET: Duration = Duration::from_secs(10);

#[test]
fn sustained_severe_channel_switches_to_high_redundancy_and_back() {
    let engine = LdpcEngine::new(&LdpcConfig::default()).unwrap();
    assert_eq!(engine.current_mode(), ErrorCorrectionMode::Standard);

    // Populate the matrix cache so invalidation is observable.
    engine.encode(&[1, 0, 1, 1, 0], BUDGET).unwrap();
    assert_eq!(engine.cache_len(), 1);

    for _ in 0..10 {
        engine.observe_ber(0.20);
    }
    assert_eq!(
        engine.current_channel_condition(),
        ChannelCondition::Severe
    );
    assert_eq!(engine.current_mode(), ErrorCorrectionMode::HighRedundancy);
    let params = engine.code_parameters();
    assert!((params.code_rate - 0.33).abs() < 1e-9);
    assert_eq!(params.block_length, 1024);
    assert_eq!(params.max_iterations, 50);
    assert_eq!(engine.cache_len(), 0);

    for _ in 0..10 {
        engine.observe_ber(0.005);
    }
    assert_eq!(
        engine.current_channel_condition(),
        ChannelCondition::Excellent
    );
    assert_eq!(engine.current_mode(), ErrorCorrectionMode::Fast);
    assert!((engine.code_parameters().code_rate - 0.75).abs() < 1e-9);
}

#[test]
fn one_bad_block_does_not_switch_modes() {
    let engine = LdpcEngine::new(&LdpcConfig::default()).unwrap();
    engine.observe_ber(0.001);
    engine.observe_ber(0.20);
    engine.observe_ber(0.001);
    assert_eq!(engine.current_mode(), ErrorCorrectionMode::Standard);
}

#[test]
fn disabled_adaptation_keeps_the_configured_rate() {
    let config = LdpcConfig {
        enable_adaptive_mode: false,
        ..LdpcConfig::default()
    };
    let engine = LdpcEngine::new(&config).unwrap();
    for _ in 0..10 {
        engine.observe_ber(0.25);
    }
    assert_eq!(engine.current_mode(), ErrorCorrectionMode::Standard);
    assert!((engine.code_parameters().code_rate - 0.5).abs() < 1e-9);
}

#[test]
fn error_bursts_raise_the_alarm_counter() {
    let engine = LdpcEngine::new(&LdpcConfig::default()).unwrap();
    let metrics = engine.metrics();
    for _ in 0..6 {
        engine.observe_ber(0.12);
    }
    assert_eq!(metrics.burst_count(), 6);
    // Low-error blocks do not extend the burst window.
    engine.observe_ber(0.001);
    assert_eq!(metrics.burst_count(), 6);
}

#[test]
fn encoder_failure_latch_forces_high_redundancy() {
    let engine = LdpcEngine::new(&LdpcConfig::default()).unwrap();
    for _ in 0..6 {
        let err = engine.encode(&[0, 1, 9], BUDGET).unwrap_err();
        assert!(matches!(err, groundlink::CodecError::InvalidInput(_)));
    }
    assert!(engine.is_degraded());

    // The next successful encode runs with the safer parameters and clears
    // the latch.
    let (_, meta) = engine.encode(&[1, 1, 0, 1], BUDGET).unwrap();
    assert_eq!(meta.mode, ErrorCorrectionMode::HighRedundancy);
    assert!((meta.code_rate - 0.33).abs() < 1e-9);
    assert!(!engine.is_degraded());

    let summary = engine.summary();
    assert_eq!(summary.consecutive_failures, 0);
    assert!(!summary.degraded_mode);
}

#[test]
fn summary_reflects_codec_activity() {
    let engine = LdpcEngine::new(&LdpcConfig::default()).unwrap();
    let bits = vec![1u8, 0, 1, 1, 0, 0, 1];
    let (encoded, meta) = engine.encode(&bits, BUDGET).unwrap();
    let result = engine.decode(&encoded, &meta, BUDGET).unwrap();
    assert!(result.success);

    let summary = engine.summary();
    assert_eq!(summary.stats.total_operations, 1);
    assert!(summary.stats.success_rate > 0.99);
    assert_eq!(summary.current_mode, ErrorCorrectionMode::Standard);
    assert_eq!(summary.cache_size, 1);
    assert_eq!(summary.block_length, 1024);
}
