//! Host runtime seam
//!
//! Executable units are opaque to this crate. The embedding runtime supplies
//! the two operations that interpret them.

use crate::error::BoxError;
use crate::importer::ModuleSpec;

/// Operations the embedding runtime provides for executable units.
pub trait HostRuntime: Send + Sync {
    /// Deserialized form of a unit, ready to execute.
    type Code: Send;

    /// Turn the bytes produced by the read pipeline into code.
    fn unmarshal(&self, name: &str, bytes: Vec<u8>) -> Result<Self::Code, BoxError>;

    /// Run a loaded unit.
    fn execute(&self, spec: &ModuleSpec, code: &Self::Code) -> Result<(), BoxError>;
}

/// Host that keeps units as raw bytes and executes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueUnits;

impl HostRuntime for OpaqueUnits {
    type Code = Vec<u8>;

    fn unmarshal(&self, _name: &str, bytes: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        Ok(bytes)
    }

    fn execute(&self, _spec: &ModuleSpec, _code: &Vec<u8>) -> Result<(), BoxError> {
        Ok(())
    }
}
