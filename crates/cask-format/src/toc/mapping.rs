//! Self-describing TOC encoding
//!
//! A JSON object mapping each entry name to an array. Three shapes load:
//!
//! - `[type, offset, length]`: legacy, always compressed, size unknown
//! - `[type, offset, compressed_length, uncompressed_length]`: compressed
//! - `[type, offset, compressed_length, uncompressed_length, flags]`
//!
//! Dumping writes the 4-element shape when the entry is compressed and not
//! encrypted, and the 5-element shape otherwise. Object order follows the
//! entry order. A name appearing twice makes the TOC corrupt.

use std::fmt;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::{flags, TocEntry, TypeCode};
use crate::error::{ArchiveError, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MappingValue {
    Flagged(u8, u32, u32, u32, u8),
    Sized(u8, u32, u32, u32),
    Legacy(u8, u32, u32),
}

impl MappingValue {
    fn from_entry(entry: &TocEntry) -> Self {
        let code = entry.type_code.as_u8();
        if entry.flag_byte() == flags::COMPRESSED {
            MappingValue::Sized(
                code,
                entry.data_offset,
                entry.compressed_length,
                entry.uncompressed_length,
            )
        } else {
            MappingValue::Flagged(
                code,
                entry.data_offset,
                entry.compressed_length,
                entry.uncompressed_length,
                entry.flag_byte(),
            )
        }
    }

    fn into_entry(self, name: String) -> TocEntry {
        let (code, data_offset, compressed_length, uncompressed_length, bits) = match self {
            MappingValue::Flagged(code, offset, clen, ulen, bits) => (code, offset, clen, ulen, bits),
            MappingValue::Sized(code, offset, clen, ulen) => {
                (code, offset, clen, ulen, flags::COMPRESSED)
            }
            MappingValue::Legacy(code, offset, len) => (code, offset, len, 0, flags::COMPRESSED),
        };

        let mut entry = TocEntry {
            name,
            data_offset,
            compressed_length,
            uncompressed_length,
            compressed: false,
            encrypted: false,
            type_code: TypeCode::from_u8(code),
        };
        entry.set_flag_byte(bits);
        entry
    }
}

/// Encode entries as a JSON object.
pub fn dump(entries: &[TocEntry]) -> Result<Vec<u8>> {
    let map: IndexMap<&str, MappingValue> = entries
        .iter()
        .map(|entry| (entry.name.as_str(), MappingValue::from_entry(entry)))
        .collect();
    Ok(serde_json::to_vec(&map)?)
}

// Object members in document order, repeated keys included.
struct Members(Vec<(String, MappingValue)>);

impl<'de> Deserialize<'de> for Members {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = Members;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of entry names to TOC arrays")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Members, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut members = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(member) = map.next_entry()? {
                    members.push(member);
                }
                Ok(Members(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

/// Decode a JSON object into entries, in document order.
pub fn load(bytes: &[u8]) -> Result<Vec<TocEntry>> {
    let Members(members) = serde_json::from_slice(bytes)?;
    let mut seen = FxHashSet::default();
    let mut entries = Vec::with_capacity(members.len());
    for (name, value) in members {
        if !seen.insert(name.clone()) {
            return Err(ArchiveError::CorruptToc(format!("duplicate entry name '{}'", name)));
        }
        entries.push(value.into_entry(name));
    }
    Ok(entries)
}
