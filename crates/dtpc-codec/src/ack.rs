use dtpc_core::{ProfileId, SeqNo};

use crate::adu::{ACK_TYPE, VERSION_MASK};
use crate::error::CodecError;
use crate::sdnv::{decode_sdnv_u32, decode_seq, encode_sdnv, encode_seq};

/// Acknowledgment of one ADU, identified by profile and sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub profile: ProfileId,
    pub seq: SeqNo,
}

impl AckFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.push(ACK_TYPE);
        encode_sdnv(u128::from(self.profile), &mut out);
        encode_seq(self.seq, &mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let Some(&type_byte) = bytes.first() else {
            return Err(CodecError::Truncated("ack type"));
        };
        if type_byte & VERSION_MASK != 0 {
            return Err(CodecError::UnsupportedVersion(type_byte & VERSION_MASK));
        }
        if type_byte != ACK_TYPE {
            return Err(CodecError::UnknownType(type_byte));
        }
        let mut offset = 1;
        let (profile, used) = decode_sdnv_u32(&bytes[offset..])?;
        offset += used;
        let (seq, used) = decode_seq(&bytes[offset..])?;
        offset += used;
        if offset != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - offset));
        }
        Ok(Self { profile, seq })
    }
}
