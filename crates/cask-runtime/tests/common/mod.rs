//! Shared fixtures for runtime integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cask_format::{
    BuildOptions, Builder, TocEntry, TocFormat, Trailer, TypeCode, FORMAT_VERSION, TRAILER_SIZE,
};
use cask_runtime::{BoxError, HostRuntime, ModuleSpec};

/// One unit to bundle: name, type, bytes, compress.
pub type Unit<'a> = (&'a str, TypeCode, &'a [u8], bool);

/// Build a container in memory.
pub fn build(options: BuildOptions, units: &[Unit<'_>]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new(), options).unwrap();
    for (name, code, data, compress) in units {
        builder.add(name, *code, data, *compress).unwrap();
    }
    builder.finish().unwrap()
}

/// Lay out already-transformed payloads with a hand-written TOC.
pub fn assemble(parts: &[(&str, TypeCode, Vec<u8>, u32, bool, bool)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut entries = Vec::new();
    for (name, type_code, stored, original_len, compressed, encrypted) in parts {
        entries.push(TocEntry {
            name: name.to_string(),
            data_offset: out.len() as u32,
            compressed_length: stored.len() as u32,
            uncompressed_length: *original_len,
            compressed: *compressed,
            encrypted: *encrypted,
            type_code: *type_code,
        });
        out.extend_from_slice(stored);
    }

    lay_out(out, &entries)
}

/// Append a fixed-struct TOC and trailer for `entries` after `payload`.
pub fn lay_out(mut payload: Vec<u8>, entries: &[TocEntry]) -> Vec<u8> {
    let toc = TocFormat::FixedStruct.dump(entries).unwrap();
    let trailer = Trailer {
        format: TocFormat::FixedStruct,
        total_length: (payload.len() + toc.len() + TRAILER_SIZE) as u32,
        toc_offset: payload.len() as u32,
        toc_length: toc.len() as i32,
        format_version: FORMAT_VERSION,
        runtime_name: "libcask".to_string(),
    };
    payload.extend_from_slice(&toc);
    payload.extend_from_slice(&trailer.encode());
    payload
}

/// Write `bytes` to `dir/name`.
pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Deterministic, poorly compressible bytes.
pub fn noise(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Host that rejects units starting with `BAD` and records executions.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub executed: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl HostRuntime for RecordingHost {
    type Code = Vec<u8>;

    fn unmarshal(&self, name: &str, bytes: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        if bytes.starts_with(b"BAD") {
            return Err(format!("{name}: not a valid unit").into());
        }
        Ok(bytes)
    }

    fn execute(&self, spec: &ModuleSpec, code: &Vec<u8>) -> Result<(), BoxError> {
        if code.starts_with(b"FAIL") {
            return Err(format!("{} raised", spec.name).into());
        }
        self.executed.lock().unwrap().push(spec.name.clone());
        Ok(())
    }
}
