use std::panic;

use dtpc_codec::ack::AckFrame;
use dtpc_codec::adu::{decode_adu, encode_adu, AduFrame, TopicFrame};
use dtpc_codec::message::decode_message;
use dtpc_codec::sdnv::decode_sdnv;
use dtpc_core::SeqNo;

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

fn sample_adu() -> AduFrame {
    let mut frame = AduFrame::new(9, SeqNo::from_u64(77_777));
    for topic in 1..4_u32 {
        frame.topics.push(TopicFrame {
            topic,
            records: (0..topic as usize)
                .map(|i| vec![topic as u8; 17 * (i + 1)])
                .collect(),
        });
    }
    frame
}

#[test]
fn fuzz_like_random_inputs_do_not_panic_decoders() {
    for i in 0..2000_u64 {
        let len = ((i as usize) * 73) % 2048;
        let mut data = random_bytes(0xD7C0_5EED ^ i, len);
        // Give half the cases a valid type byte so decoding goes past it.
        if i % 2 == 0 && !data.is_empty() {
            data[0] &= 0x01;
        }

        let message = panic::catch_unwind(|| decode_message(&data));
        assert!(message.is_ok(), "decode_message panicked at case {i}");

        let adu = panic::catch_unwind(|| decode_adu(&data));
        assert!(adu.is_ok(), "decode_adu panicked at case {i}");

        let ack = panic::catch_unwind(|| AckFrame::decode(&data));
        assert!(ack.is_ok(), "AckFrame::decode panicked at case {i}");

        let sdnv = panic::catch_unwind(|| decode_sdnv(&data));
        assert!(sdnv.is_ok(), "decode_sdnv panicked at case {i}");
    }
}

#[test]
fn fuzz_like_mutations_of_valid_vectors_do_not_panic() {
    let mut adu_bytes = encode_adu(&sample_adu());
    for i in 0..512_usize {
        let idx = i % adu_bytes.len();
        adu_bytes[idx] ^= (i as u8).wrapping_mul(31).wrapping_add(1);
        let data = adu_bytes.clone();

        let message = panic::catch_unwind(|| decode_message(&data));
        assert!(
            message.is_ok(),
            "decode_message panicked for mutated adu at case {i}",
        );
        let adu = panic::catch_unwind(|| decode_adu(&data));
        assert!(adu.is_ok(), "decode_adu panicked for mutated adu at case {i}");
    }
}

#[test]
fn every_truncation_of_a_valid_adu_is_rejected_or_shorter() {
    let frame = sample_adu();
    let bytes = encode_adu(&frame);
    for cut in 0..bytes.len() {
        if let Ok(partial) = decode_adu(&bytes[..cut]) {
            assert!(partial.topics.len() < frame.topics.len(), "cut {cut}");
        }
    }
}
