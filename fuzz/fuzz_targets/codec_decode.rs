#![no_main]

use dtpc_codec::ack::AckFrame;
use dtpc_codec::adu::{decode_adu, TopicReader};
use dtpc_codec::message::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode_message(data);
    let _ = decode_adu(data);
    let _ = AckFrame::decode(data);
    for topic in TopicReader::new(data) {
        if topic.is_err() {
            break;
        }
    }
});
