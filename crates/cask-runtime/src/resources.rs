//! Read-only resource traversal.
//!
//! Children of a package are the entries whose dotted name is the package
//! name plus exactly one more segment. Only data and binary entries count
//! as resources; modules and subpackages are listed but are not readable
//! through this view.

use cask_format::{ArchiveError, Result, TocEntry, TypeCode};

use crate::archive::Archive;
use crate::importer::is_hidden;

/// Resource view of one package.
#[derive(Debug, Clone, Copy)]
pub struct ResourceReader<'a> {
    archive: &'a Archive,
    package: &'a str,
}

impl<'a> ResourceReader<'a> {
    /// View of `package`; the empty name is the top level.
    pub fn new(archive: &'a Archive, package: &'a str) -> Self {
        Self { archive, package }
    }

    /// Package this view covers.
    pub fn package(&self) -> &str {
        self.package
    }

    fn children(&self) -> impl Iterator<Item = (&'a str, &'a TocEntry)> + 'a {
        self.archive
            .toc()
            .children(self.package)
            .filter(|(_, entry)| !is_hidden(entry))
    }

    /// Names of all direct children, in TOC order, without duplicates.
    pub fn contents(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (tail, _) in self.children() {
            if !names.iter().any(|name| name == tail) {
                names.push(tail.to_string());
            }
        }
        names
    }

    fn resource(&self, leaf: &str) -> Option<&'a TocEntry> {
        self.children()
            .find(|(tail, _)| *tail == leaf)
            .map(|(_, entry)| entry)
            .filter(|entry| matches!(entry.type_code, TypeCode::Data | TypeCode::Binary))
    }

    /// Whether `leaf` is a data resource of this package.
    pub fn is_resource(&self, leaf: &str) -> bool {
        self.resource(leaf).is_some()
    }

    /// Bytes of the resource `leaf`.
    pub fn read(&self, leaf: &str) -> Result<Vec<u8>> {
        let entry = self.resource(leaf).ok_or_else(|| {
            ArchiveError::NameNotFound(if self.package.is_empty() {
                leaf.to_string()
            } else {
                format!("{}.{}", self.package, leaf)
            })
        })?;
        Ok(self.archive.extract_entry(entry)?.data)
    }
}
