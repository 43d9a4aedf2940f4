use dtpc_core::{ProfileId, SeqNo, TopicId};

use crate::error::CodecError;
use crate::sdnv::{decode_sdnv_u32, decode_sdnv_u64, decode_seq, encode_sdnv, encode_seq, sdnv_len};

/// Type byte of an aggregated data unit.
pub const ADU_TYPE: u8 = 0x00;
/// Type byte of an acknowledgment.
pub const ACK_TYPE: u8 = 0x01;
/// Reserved version bits in the type byte; must be zero.
pub const VERSION_MASK: u8 = 0xC0;

/// Fixed part of an ADU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AduHeader {
    pub profile: ProfileId,
    pub seq: SeqNo,
}

/// Records for one topic, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFrame {
    pub topic: TopicId,
    pub records: Vec<Vec<u8>>,
}

/// Fully decoded ADU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AduFrame {
    pub header: AduHeader,
    pub topics: Vec<TopicFrame>,
}

impl AduFrame {
    pub fn new(profile: ProfileId, seq: SeqNo) -> Self {
        Self {
            header: AduHeader { profile, seq },
            topics: Vec::new(),
        }
    }

    /// Exact serialized size of this frame.
    pub fn encoded_len(&self) -> usize {
        let mut len = 1
            + sdnv_len(u128::from(self.header.profile))
            + sdnv_len(self.header.seq.to_u128());
        for topic in &self.topics {
            len += sdnv_len(u128::from(topic.topic));
            len += sdnv_len(topic.records.len() as u128);
            for record in &topic.records {
                len += sdnv_len(record.len() as u128) + record.len();
            }
        }
        len
    }
}

/// Serializes an ADU into one contiguous byte stream.
pub fn encode_adu(frame: &AduFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.encoded_len());
    out.push(ADU_TYPE);
    encode_sdnv(u128::from(frame.header.profile), &mut out);
    encode_seq(frame.header.seq, &mut out);
    for topic in &frame.topics {
        encode_sdnv(u128::from(topic.topic), &mut out);
        encode_sdnv(topic.records.len() as u128, &mut out);
        for record in &topic.records {
            encode_sdnv(record.len() as u128, &mut out);
            out.extend_from_slice(record);
        }
    }
    out
}

/// Decodes the type byte, profile and sequence number of an ADU.
///
/// Returns the header and the offset at which the topic section starts.
pub fn decode_adu_header(bytes: &[u8]) -> Result<(AduHeader, usize), CodecError> {
    let Some(&type_byte) = bytes.first() else {
        return Err(CodecError::Truncated("adu type"));
    };
    if type_byte & VERSION_MASK != 0 {
        return Err(CodecError::UnsupportedVersion(type_byte & VERSION_MASK));
    }
    if type_byte != ADU_TYPE {
        return Err(CodecError::UnknownType(type_byte));
    }
    let mut offset = 1;
    let (profile, used) = decode_sdnv_u32(&bytes[offset..])?;
    offset += used;
    let (seq, used) = decode_seq(&bytes[offset..])?;
    offset += used;
    Ok((AduHeader { profile, seq }, offset))
}

/// Decodes a complete ADU, failing on the first malformed topic.
pub fn decode_adu(bytes: &[u8]) -> Result<AduFrame, CodecError> {
    let (header, offset) = decode_adu_header(bytes)?;
    let topics = TopicReader::new(&bytes[offset..]).collect::<Result<Vec<_>, _>>()?;
    Ok(AduFrame { header, topics })
}

/// Iterates the topic section of an ADU.
///
/// Yields topics until the input is exhausted. After the first error the
/// reader is fused and yields nothing further.
pub struct TopicReader<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> TopicReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            rest: body,
            failed: false,
        }
    }

    fn read_topic(&mut self) -> Result<TopicFrame, CodecError> {
        let (topic, used) = decode_sdnv_u32(self.rest)?;
        self.rest = &self.rest[used..];
        let (count, used) = decode_sdnv_u64(self.rest)?;
        self.rest = &self.rest[used..];
        if count == 0 {
            return Err(CodecError::InvalidFrame("topic without records"));
        }
        let mut records = Vec::new();
        for _ in 0..count {
            let (len, used) = decode_sdnv_u64(self.rest)?;
            self.rest = &self.rest[used..];
            let len = usize::try_from(len).map_err(|_| CodecError::SdnvOverflow)?;
            if len > self.rest.len() {
                return Err(CodecError::Truncated("record payload"));
            }
            let (payload, tail) = self.rest.split_at(len);
            records.push(payload.to_vec());
            self.rest = tail;
        }
        Ok(TopicFrame { topic, records })
    }
}

impl Iterator for TopicReader<'_> {
    type Item = Result<TopicFrame, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let result = self.read_topic();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
