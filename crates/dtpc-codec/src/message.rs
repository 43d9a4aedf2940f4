use crate::ack::AckFrame;
use crate::adu::{decode_adu_header, AduHeader, ACK_TYPE, ADU_TYPE, VERSION_MASK};
use crate::error::CodecError;

/// Any frame that can arrive on the DTPC receive service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtpcMessage {
    /// Data unit; `body` holds the undecoded topic section.
    Adu { header: AduHeader, body: Vec<u8> },
    Ack(AckFrame),
}

/// Classifies and decodes one inbound payload.
pub fn decode_message(bytes: &[u8]) -> Result<DtpcMessage, CodecError> {
    let Some(&type_byte) = bytes.first() else {
        return Err(CodecError::Truncated("message type"));
    };
    if type_byte & VERSION_MASK != 0 {
        return Err(CodecError::UnsupportedVersion(type_byte & VERSION_MASK));
    }
    match type_byte {
        ADU_TYPE => {
            let (header, offset) = decode_adu_header(bytes)?;
            Ok(DtpcMessage::Adu {
                header,
                body: bytes[offset..].to_vec(),
            })
        }
        ACK_TYPE => Ok(DtpcMessage::Ack(AckFrame::decode(bytes)?)),
        other => Err(CodecError::UnknownType(other)),
    }
}
