// Integration tests for the PCM16 wire codec
//
// Every i16 must survive decode-then-encode unchanged, and the base64 payload
// must be exactly two bytes per sample.

use base64::Engine;
use spark_live::audio::codec::{
    decode_frame, encode_frame, encode_pcm16, pcm16_to_samples, samples_to_pcm16,
};
use spark_live::{LiveChatError, SampleOverflow};

fn ramp(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| (i as i64 * 7919 % 65536 - 32768) as i16)
        .collect()
}

#[test]
fn test_pcm_roundtrip_for_frame_lengths() {
    for len in [0usize, 1, 4096, 4095] {
        let pcm = ramp(len);
        let samples = pcm16_to_samples(&pcm);

        for overflow in [SampleOverflow::Clamp, SampleOverflow::Wrap] {
            assert_eq!(samples_to_pcm16(&samples, overflow), pcm, "len {}", len);

            let wire = encode_frame(&samples, overflow);
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&wire)
                .unwrap();
            assert_eq!(bytes.len(), len * 2);

            let decoded = decode_frame(&wire, 16000, 1).unwrap();
            assert_eq!(decoded.channels[0], samples);
        }
    }
}

#[test]
fn test_extremes_roundtrip() {
    let pcm = vec![i16::MIN, -1, 0, 1, i16::MAX];
    let samples = pcm16_to_samples(&pcm);
    assert_eq!(samples[0], -1.0);
    assert_eq!(samples_to_pcm16(&samples, SampleOverflow::Clamp), pcm);
}

#[test]
fn test_full_scale_positive_sample_depends_on_policy() {
    let clamped = samples_to_pcm16(&[1.0], SampleOverflow::Clamp);
    let wrapped = samples_to_pcm16(&[1.0], SampleOverflow::Wrap);
    assert_eq!(clamped, vec![i16::MAX]);
    assert_eq!(wrapped, vec![i16::MIN]);
}

#[test]
fn test_little_endian_layout() {
    let wire = encode_pcm16(&[0x0102, -2]);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&wire)
        .unwrap();
    assert_eq!(bytes, vec![0x02, 0x01, 0xFE, 0xFF]);
}

#[test]
fn test_decode_rejects_odd_byte_count() {
    let wire = base64::engine::general_purpose::STANDARD.encode([0u8, 1, 2]);
    assert!(matches!(
        decode_frame(&wire, 24000, 1),
        Err(LiveChatError::Protocol(_))
    ));
}
