use crate::common::{Error, Result};
use crate::util::{decode_fixed_uint64, extract_user_key};

pub const MAX_SEQUENCE_NUMBER: u64 = (1u64 << 56) - 1;

#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum ValueType {
    TypeDeletion = 0x0,
    TypeValue = 0x1,
    TypeMerge = 0x2,
}

/// The type that sorts first for a given `(user key, sequence)` pair, used to
/// build seek targets that position before every entry of that sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::TypeMerge;

impl ValueType {
    pub fn from_u8(t: u8) -> Option<ValueType> {
        match t {
            0x0 => Some(ValueType::TypeDeletion),
            0x1 => Some(ValueType::TypeValue),
            0x2 => Some(ValueType::TypeMerge),
            _ => None,
        }
    }
}

pub fn pack_sequence_and_type(seq: u64, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

pub fn extract_internal_key_footer(key: &[u8]) -> u64 {
    let l = key.len();
    debug_assert!(l >= 8);
    decode_fixed_uint64(&key[(l - 8)..])
}

pub fn extract_value_type(key: &[u8]) -> u8 {
    (extract_internal_key_footer(key) & 0xffu64) as u8
}

pub fn extract_sequence(key: &[u8]) -> u64 {
    extract_internal_key_footer(key) >> 8
}

/// Builds the internal key that sorts before every entry for `user_key`.
pub fn make_internal_seek_key(user_key: &[u8]) -> Vec<u8> {
    let mut key = user_key.to_vec();
    key.extend_from_slice(
        &pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
    );
    key
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: u64,
    pub tp: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(key: &'a [u8]) -> Result<ParsedInternalKey<'a>> {
        if key.len() < 8 {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                key.len()
            )));
        }
        let footer = extract_internal_key_footer(key);
        let tp = ValueType::from_u8((footer & 0xff) as u8).ok_or_else(|| {
            Error::Corruption(format!("unknown value type: {}", footer & 0xff))
        })?;
        Ok(ParsedInternalKey {
            user_key: extract_user_key(key),
            sequence: footer >> 8,
            tp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_internal_key() {
        let mut key = b"user-key".to_vec();
        key.extend_from_slice(&pack_sequence_and_type(33, ValueType::TypeValue).to_le_bytes());
        let parsed = ParsedInternalKey::parse(&key).unwrap();
        assert_eq!(parsed.user_key, b"user-key");
        assert_eq!(parsed.sequence, 33);
        assert_eq!(parsed.tp, ValueType::TypeValue);

        assert!(ParsedInternalKey::parse(b"short").is_err());
        let mut bad = b"user-key".to_vec();
        bad.extend_from_slice(&((33u64 << 8) | 0x17).to_le_bytes());
        assert!(ParsedInternalKey::parse(&bad).is_err());
    }
}
