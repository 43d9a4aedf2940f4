use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::state::EngineState;

/// Errors returned by engine state persistence helpers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode engine state: {0}")]
    Encode(ciborium::ser::Error<std::io::Error>),
    #[error("failed to decode engine state: {0}")]
    Decode(ciborium::de::Error<std::io::Error>),
    #[error("failed to read state file: {0}")]
    Read(std::io::Error),
    #[error("failed to write state file: {0}")]
    Write(std::io::Error),
}

/// Encodes [`EngineState`] to CBOR bytes.
pub fn encode_state_cbor(state: &EngineState) -> Result<Vec<u8>, PersistenceError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(state, &mut bytes).map_err(PersistenceError::Encode)?;
    Ok(bytes)
}

/// Decodes [`EngineState`] from CBOR bytes.
pub fn decode_state_cbor(bytes: &[u8]) -> Result<EngineState, PersistenceError> {
    ciborium::from_reader(bytes).map_err(PersistenceError::Decode)
}

/// Saves state to the given path as CBOR, replacing the file atomically.
pub fn save_state_to_path(
    path: impl AsRef<Path>,
    state: &EngineState,
) -> Result<(), PersistenceError> {
    let bytes = encode_state_cbor(state)?;
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(PersistenceError::Write)?;
    fs::rename(&tmp, path).map_err(PersistenceError::Write)
}

/// Loads state from the given CBOR file path.
pub fn load_state_from_path(path: impl AsRef<Path>) -> Result<EngineState, PersistenceError> {
    let bytes = fs::read(path.as_ref()).map_err(PersistenceError::Read)?;
    decode_state_cbor(&bytes)
}

/// Loads state if the file exists; otherwise returns a default empty state.
pub fn load_state_or_default(path: impl AsRef<Path>) -> Result<EngineState, PersistenceError> {
    if !path.as_ref().exists() {
        return Ok(EngineState::default());
    }
    load_state_from_path(path)
}
