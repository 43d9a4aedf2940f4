//! Self-delimiting numeric values.
//!
//! Big-endian 7-bit groups; every byte except the last carries the
//! continuation bit `0x80`. ADU and ACK frames share this one encoding.

use dtpc_core::SeqNo;

use crate::error::CodecError;

const CONTINUATION: u8 = 0x80;
/// Longest SDNV accepted by the decoder (enough for 128 bits).
pub const MAX_SDNV_LEN: usize = 19;

/// Number of bytes `value` occupies once encoded.
pub fn sdnv_len(value: u128) -> usize {
    let bits = 128 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Appends the SDNV encoding of `value` to `out`.
pub fn encode_sdnv(value: u128, out: &mut Vec<u8>) {
    let len = sdnv_len(value);
    for i in (0..len).rev() {
        let group = ((value >> (7 * i)) & 0x7f) as u8;
        if i == 0 {
            out.push(group);
        } else {
            out.push(group | CONTINUATION);
        }
    }
}

/// Decodes one SDNV prefix, returning the value and bytes consumed.
pub fn decode_sdnv(bytes: &[u8]) -> Result<(u128, usize), CodecError> {
    let mut value: u128 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= MAX_SDNV_LEN || value >> 121 != 0 {
            return Err(CodecError::SdnvOverflow);
        }
        value = (value << 7) | u128::from(byte & 0x7f);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CodecError::Truncated("sdnv"))
}

/// Decodes an SDNV that must fit in 32 bits.
pub fn decode_sdnv_u32(bytes: &[u8]) -> Result<(u32, usize), CodecError> {
    let (value, used) = decode_sdnv(bytes)?;
    let value = u32::try_from(value).map_err(|_| CodecError::SdnvOverflow)?;
    Ok((value, used))
}

/// Decodes an SDNV that must fit in 64 bits.
pub fn decode_sdnv_u64(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let (value, used) = decode_sdnv(bytes)?;
    let value = u64::try_from(value).map_err(|_| CodecError::SdnvOverflow)?;
    Ok((value, used))
}

/// Appends a sequence number as one flat SDNV.
pub fn encode_seq(seq: SeqNo, out: &mut Vec<u8>) {
    encode_sdnv(seq.to_u128(), out);
}

/// Decodes a sequence number written by [`encode_seq`].
pub fn decode_seq(bytes: &[u8]) -> Result<(SeqNo, usize), CodecError> {
    let (value, used) = decode_sdnv(bytes)?;
    Ok((SeqNo::from_u128(value)?, used))
}
