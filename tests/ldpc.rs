use groundlink::ldpc::{bits_from_bytes, simulate_channel_errors};
use groundlink::{CodecError, LdpcConfig, LdpcEngine};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

const ENCODE_BUDGET: Duration = Duration::from_secs(10);
const DECODE_BUDGET: Duration = Duration::from_secs(30);

fn engine() -> LdpcEngine {
    LdpcEngine::new(&LdpcConfig::default()).unwrap()
}

fn hello_world_bits() -> Vec<u8> {
    let bits = bits_from_bytes(b"HELLO WORLD");
    assert_eq!(bits.len(), 88);
    bits
}

#[test]
fn round_trip_over_clean_channel() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();

    assert_eq!(meta.original_bit_length, 88);
    assert_eq!(meta.block_length, 1024);
    assert_eq!(meta.padding_bits, 512 - 88);
    assert_eq!(meta.encoded_bit_length, 1024);
    assert_eq!(encoded.len(), 1024);

    let result = engine.decode(&encoded, &meta, DECODE_BUDGET).unwrap();
    assert!(result.success);
    assert_eq!(result.corrected_bits.as_deref(), Some(bits.as_slice()));
    assert!(result.error_positions.is_empty());
    assert_eq!(result.bit_error_rate, 0.0);
    assert!(result.iterations_used <= 50);
}

#[test]
fn recovery_at_five_percent_error_rate() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();

    // Flip 5% of the codeword bits, chosen uniformly at random.
    let mut rng = StdRng::seed_from_u64(42);
    let mut corrupted = encoded.clone();
    let flips = rand::seq::index::sample(&mut rng, corrupted.len(), corrupted.len() / 20);
    for i in flips {
        corrupted[i] ^= 1;
    }

    let result = engine.decode(&corrupted, &meta, DECODE_BUDGET).unwrap();
    assert!(result.success, "decode failed: {:?}", result.syndrome_norm);
    assert_eq!(result.corrected_bits.as_deref(), Some(bits.as_slice()));
    assert!(result.bit_error_rate <= 0.06, "BER {}", result.bit_error_rate);
    assert!(result.iterations_used <= 50);
}

#[test]
fn recovery_probability_at_two_percent() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();

    let mut successes = 0;
    for trial in 0..100u64 {
        let corrupted = simulate_channel_errors(&encoded, 0.02, 0.0, 0.0, trial);
        let result = engine.decode(&corrupted, &meta, DECODE_BUDGET).unwrap();
        if result.success && result.corrected_bits.as_deref() == Some(bits.as_slice()) {
            successes += 1;
        }
    }
    assert!(successes >= 95, "only {} of 100 trials recovered", successes);
}

#[test]
fn multi_block_padding_round_trip() {
    let engine = engine();
    // 1000 bits span two 512-bit information blocks with 24 padding bits.
    let bits: Vec<u8> = (0..1000).map(|i| (i % 3 == 0) as u8).collect();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();
    assert_eq!(meta.padding_bits, 24);
    assert_eq!(meta.encoded_bit_length, 2 * 1024);

    let result = engine.decode(&encoded, &meta, DECODE_BUDGET).unwrap();
    assert!(result.success);
    assert_eq!(result.corrected_bits.as_deref(), Some(bits.as_slice()));
    // The iteration bound holds per result, not per block.
    assert!(result.iterations_used <= 50);
}

#[test]
fn iterations_never_exceed_cap() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();

    let corrupted = simulate_channel_errors(&encoded, 0.3, 0.0, 0.0, 7);
    let result = engine.decode(&corrupted, &meta, DECODE_BUDGET).unwrap();
    assert!(result.iterations_used <= 50);
    assert!(!result.success);
}

#[test]
fn digest_mismatch_fails_the_decode() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, mut meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();
    meta.digest[0] ^= 0xff;

    let result = engine.decode(&encoded, &meta, DECODE_BUDGET).unwrap();
    assert!(!result.success);
    // The bits themselves still came back clean.
    assert_eq!(result.corrected_bits.as_deref(), Some(bits.as_slice()));
}

#[test]
fn encode_timeout_is_an_error() {
    let engine = engine();
    let bits = hello_world_bits();
    let err = engine.encode(&bits, Duration::ZERO).unwrap_err();
    assert!(matches!(err, CodecError::Timeout(_)));
}

#[test]
fn decode_timeout_is_a_failed_result() {
    let engine = engine();
    let bits = hello_world_bits();
    let (encoded, meta) = engine.encode(&bits, ENCODE_BUDGET).unwrap();

    let result = engine.decode(&encoded, &meta, Duration::ZERO).unwrap();
    assert!(!result.success);
    assert_eq!(result.bit_error_rate, 1.0);
    assert!(result.corrected_bits.is_none());
}

#[test]
fn oversized_code_is_rejected_before_allocation() {
    let config = LdpcConfig {
        block_length: 8192,
        memory_limit_mb: 1,
        ..LdpcConfig::default()
    };
    let engine = LdpcEngine::new(&config).unwrap();
    let err = engine.encode(&[1, 0, 1, 1], ENCODE_BUDGET).unwrap_err();
    assert!(matches!(err, CodecError::OutOfBudget { .. }));
}

#[test]
fn non_binary_input_is_rejected() {
    let engine = engine();
    let err = engine.encode(&[0, 1, 7], ENCODE_BUDGET).unwrap_err();
    assert!(matches!(err, CodecError::InvalidInput(_)));
}
