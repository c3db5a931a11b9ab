//! Versioned keyed save-state container
//!
//! A save state is a little-endian stream:
//!
//! ```text
//! magic "RCSS" | u32 version | u8 system tag | (key, payload)*
//! ```
//!
//! where each `(key, payload)` pair is `u32 key length | key bytes | u32 payload length |
//! payload bytes`. Payloads are bincode-encoded component state. Loaders skip unknown keys so
//! newer cores can add components without breaking older states, and reject missing required
//! keys.

use bincode::config::Configuration;
use bincode::{Decode, Encode};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"RCSS";
pub const VERSION: u32 = 1;

pub fn bincode_config() -> Configuration {
    bincode::config::standard()
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("not a save state file (bad magic)")]
    BadMagic,
    #[error("save state version {found} is not compatible with version {expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("save state is for a different system (tag {found}, expected {expected})")]
    SystemMismatch { expected: u8, found: u8 },
    #[error("save state is truncated")]
    Truncated,
    #[error("required component '{key}' missing from save state")]
    MissingKey { key: String },
    #[error("failed to encode component '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: bincode::error::EncodeError,
    },
    #[error("failed to decode component '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: bincode::error::DecodeError,
    },
}

#[derive(Debug)]
pub struct SaveStateWriter {
    bytes: Vec<u8>,
}

impl SaveStateWriter {
    #[must_use]
    pub fn new(system_tag: u8) -> Self {
        let mut bytes = Vec::with_capacity(64 * 1024);
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.push(system_tag);
        Self { bytes }
    }

    /// Append one component, bincode-encoding it under the given key.
    ///
    /// # Errors
    ///
    /// Propagates bincode encoding errors.
    pub fn write_component<E: Encode>(&mut self, key: &str, component: &E) -> Result<(), SaveStateError> {
        let payload = bincode::encode_to_vec(component, bincode_config())
            .map_err(|source| SaveStateError::Encode { key: key.into(), source })?;

        self.bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(key.as_bytes());
        self.bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&payload);
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub struct SaveStateReader<'a> {
    bytes: &'a [u8],
    components_start: usize,
}

impl<'a> SaveStateReader<'a> {
    /// Validate the header and prepare to read components.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic, version, or system tag do not match.
    pub fn new(bytes: &'a [u8], expected_system_tag: u8) -> Result<Self, SaveStateError> {
        if bytes.len() < 9 {
            return Err(SaveStateError::Truncated);
        }
        if bytes[..4] != MAGIC {
            return Err(SaveStateError::BadMagic);
        }

        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(SaveStateError::VersionMismatch { expected: VERSION, found: version });
        }

        let system_tag = bytes[8];
        if system_tag != expected_system_tag {
            return Err(SaveStateError::SystemMismatch {
                expected: expected_system_tag,
                found: system_tag,
            });
        }

        Ok(Self { bytes, components_start: 9 })
    }

    #[must_use]
    pub fn system_tag(bytes: &[u8]) -> Option<u8> {
        (bytes.len() >= 9 && bytes[..4] == MAGIC).then(|| bytes[8])
    }

    /// Locate and decode a required component.
    ///
    /// # Errors
    ///
    /// Returns [`SaveStateError::MissingKey`] if the key is absent, or a decode error if the
    /// payload cannot be deserialized.
    pub fn read_component<D: Decode<()>>(&self, key: &str) -> Result<D, SaveStateError> {
        let payload = self
            .find_component(key)?
            .ok_or_else(|| SaveStateError::MissingKey { key: key.into() })?;

        let (component, _) = bincode::decode_from_slice(payload, bincode_config())
            .map_err(|source| SaveStateError::Decode { key: key.into(), source })?;
        Ok(component)
    }

    /// Locate and decode an optional component, returning `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload exists but cannot be deserialized.
    pub fn read_optional_component<D: Decode<()>>(
        &self,
        key: &str,
    ) -> Result<Option<D>, SaveStateError> {
        let Some(payload) = self.find_component(key)? else {
            return Ok(None);
        };

        let (component, _) = bincode::decode_from_slice(payload, bincode_config())
            .map_err(|source| SaveStateError::Decode { key: key.into(), source })?;
        Ok(Some(component))
    }

    fn find_component(&self, key: &str) -> Result<Option<&'a [u8]>, SaveStateError> {
        let mut idx = self.components_start;
        while idx < self.bytes.len() {
            let key_len = self.read_u32(idx)? as usize;
            idx += 4;
            let entry_key =
                self.bytes.get(idx..idx + key_len).ok_or(SaveStateError::Truncated)?;
            idx += key_len;
            let payload_len = self.read_u32(idx)? as usize;
            idx += 4;
            let payload =
                self.bytes.get(idx..idx + payload_len).ok_or(SaveStateError::Truncated)?;
            idx += payload_len;

            if entry_key == key.as_bytes() {
                return Ok(Some(payload));
            }
        }

        Ok(None)
    }

    fn read_u32(&self, idx: usize) -> Result<u32, SaveStateError> {
        let bytes = self.bytes.get(idx..idx + 4).ok_or(SaveStateError::Truncated)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    struct FakeCpu {
        pc: u16,
        cycles: u64,
    }

    #[test]
    fn round_trips_components() {
        let cpu = FakeCpu { pc: 0x8123, cycles: 123_456_789 };
        let ram = vec![0xA5_u8; 2048];

        let mut writer = SaveStateWriter::new(3);
        writer.write_component("cpu", &cpu).unwrap();
        writer.write_component("ram", &ram).unwrap();
        let bytes = writer.finish();

        let reader = SaveStateReader::new(&bytes, 3).unwrap();
        assert_eq!(reader.read_component::<FakeCpu>("cpu").unwrap(), cpu);
        assert_eq!(reader.read_component::<Vec<u8>>("ram").unwrap(), ram);
    }

    #[test]
    fn unknown_keys_are_skipped_and_missing_keys_rejected() {
        let mut writer = SaveStateWriter::new(1);
        writer.write_component("future_component", &vec![1_u8, 2, 3]).unwrap();
        writer.write_component("cpu", &FakeCpu { pc: 1, cycles: 2 }).unwrap();
        let bytes = writer.finish();

        let reader = SaveStateReader::new(&bytes, 1).unwrap();
        assert!(reader.read_component::<FakeCpu>("cpu").is_ok());
        assert!(matches!(
            reader.read_component::<FakeCpu>("apu"),
            Err(SaveStateError::MissingKey { .. })
        ));
        assert_eq!(reader.read_optional_component::<FakeCpu>("apu").unwrap(), None);
    }

    #[test]
    fn rejects_wrong_system_and_version() {
        let writer = SaveStateWriter::new(2);
        let bytes = writer.finish();

        assert!(matches!(
            SaveStateReader::new(&bytes, 5),
            Err(SaveStateError::SystemMismatch { expected: 5, found: 2 })
        ));

        let mut corrupt = bytes.clone();
        corrupt[4] = 0xFF;
        assert!(matches!(
            SaveStateReader::new(&corrupt, 2),
            Err(SaveStateError::VersionMismatch { .. })
        ));

        assert!(matches!(SaveStateReader::new(b"nope", 2), Err(SaveStateError::Truncated)));
    }
}
