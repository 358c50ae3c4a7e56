//! Module finder and loader
//!
//! The importer answers the host's module-resolution queries from one
//! archive. A lookup moves through `find` (entry located, or declined so the
//! host can try another resolver), `load` (read pipeline plus host
//! unmarshal) and `exec`. Declines are routine and silent; failures after a
//! name was found surface as errors distinct from "not found".
//!
//! Origins are synthesized paths under a configurable root, built from the
//! dotted name. No such files exist. Packages also get a search location,
//! and lookups that pass it back as a search root are mapped onto the
//! dotted prefix again.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use cask_format::{ArchiveError, TocEntry, TypeCode, KEY_ENTRY_NAME};
use tracing::{debug, trace};

use crate::archive::Archive;
use crate::error::{Result, RuntimeError};
use crate::host::HostRuntime;
use crate::resources::ResourceReader;

/// Default file stem of a synthesized package origin.
pub const DEFAULT_INIT_STEM: &str = "__init__";

/// Default extension of synthesized origins.
pub const DEFAULT_EXTENSION: &str = "unit";

/// What kind of importable unit an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Plain module
    Module,
    /// Package with an init unit
    Package,
    /// Package with no code of its own
    NamespacePackage,
}

impl UnitKind {
    fn of(type_code: TypeCode) -> Option<Self> {
        match type_code {
            TypeCode::Module => Some(UnitKind::Module),
            TypeCode::Package => Some(UnitKind::Package),
            TypeCode::NamespacePackage => Some(UnitKind::NamespacePackage),
            _ => None,
        }
    }

    /// Packages and namespace packages.
    pub fn is_package(self) -> bool {
        !matches!(self, UnitKind::Module)
    }
}

/// Metadata for a found unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Name the host asked for
    pub name: String,

    /// TOC entry that satisfied the lookup
    pub entry_name: String,

    /// Unit kind
    pub kind: UnitKind,

    /// Synthesized origin path; namespace packages have none
    pub origin: Option<PathBuf>,

    /// Search locations for submodules, packages only
    pub search_locations: Option<Vec<PathBuf>>,
}

impl ModuleSpec {
    /// Whether the unit is a package.
    pub fn is_package(&self) -> bool {
        self.kind.is_package()
    }
}

/// Result of a finder query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOutcome {
    /// Not in this bundle; the host should try the next resolver
    Declined,
    /// Found
    Found(ModuleSpec),
}

impl FindOutcome {
    /// Whether the lookup succeeded.
    pub fn is_found(&self) -> bool {
        matches!(self, FindOutcome::Found(_))
    }

    /// The spec, if found.
    pub fn into_spec(self) -> Option<ModuleSpec> {
        match self {
            FindOutcome::Found(spec) => Some(spec),
            FindOutcome::Declined => None,
        }
    }
}

/// A loaded unit. Namespace packages carry no code.
#[derive(Debug)]
pub struct LoadedUnit<C> {
    /// Resolution record the unit was loaded from
    pub spec: ModuleSpec,

    /// Host code, absent for namespace packages
    pub code: Option<C>,
}

impl<C> LoadedUnit<C> {
    /// Whether the unit is a package.
    pub fn is_package(&self) -> bool {
        self.spec.is_package()
    }
}

/// How synthesized origins are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginLayout {
    /// Directory every origin is placed under
    pub root: PathBuf,

    /// File stem of a package's own origin
    pub init_stem: String,

    /// Extension of every origin
    pub extension: String,
}

impl Default for OriginLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            init_stem: DEFAULT_INIT_STEM.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl OriginLayout {
    /// Layout rooted at `root` with default stem and extension.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// `root/a/b` for `a.b`.
    pub fn directory(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(name.split('.'));
        path
    }

    /// `root/a/b/__init__.unit` for package `a.b`, `root/a/b.unit` for
    /// module `a.b`, nothing for namespace packages.
    pub fn origin(&self, name: &str, kind: UnitKind) -> Option<PathBuf> {
        match kind {
            UnitKind::Module => Some(self.directory(name).with_extension(&self.extension)),
            UnitKind::Package => Some(
                self.directory(name)
                    .join(&self.init_stem)
                    .with_extension(&self.extension),
            ),
            UnitKind::NamespacePackage => None,
        }
    }

    /// Search locations handed out for a package.
    pub fn search_locations(&self, name: &str, kind: UnitKind) -> Option<Vec<PathBuf>> {
        kind.is_package().then(|| vec![self.directory(name)])
    }

    /// Dotted prefix a synthesized directory stands for. The root itself
    /// maps to the empty prefix.
    pub fn name_for(&self, directory: &Path) -> Option<String> {
        let relative = directory.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(segments.join("."))
    }
}

/// Finder and loader over one archive.
pub struct BundleImporter<H: HostRuntime> {
    archive: Arc<Archive>,
    host: H,
    layout: OriginLayout,
}

impl<H: HostRuntime> BundleImporter<H> {
    /// Importer with the default origin layout.
    pub fn new(archive: Arc<Archive>, host: H) -> Self {
        Self {
            archive,
            host,
            layout: OriginLayout::default(),
        }
    }

    /// Replace the origin layout.
    pub fn with_layout(mut self, layout: OriginLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Archive served by this importer.
    pub fn archive(&self) -> &Arc<Archive> {
        &self.archive
    }

    /// Host runtime.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Origin layout.
    pub fn layout(&self) -> &OriginLayout {
        &self.layout
    }

    /// Look up `fullname`.
    ///
    /// The name is tried as-is first. When the host passes search roots
    /// (the search locations of the parent package), each root is mapped
    /// back to its dotted prefix and retried with the last segment of
    /// `fullname` appended. Entries that are not modules or packages are
    /// declined.
    pub fn find(&self, fullname: &str, search_roots: Option<&[PathBuf]>) -> FindOutcome {
        if let Some(spec) = self.spec_for(fullname, fullname) {
            trace!(name = fullname, kind = ?spec.kind, "found");
            return FindOutcome::Found(spec);
        }

        if let Some(roots) = search_roots {
            let tail = fullname.rsplit('.').next().unwrap_or(fullname);
            for root in roots {
                let Some(prefix) = self.layout.name_for(root) else {
                    continue;
                };
                let candidate = if prefix.is_empty() {
                    tail.to_string()
                } else {
                    format!("{prefix}.{tail}")
                };
                if let Some(spec) = self.spec_for(fullname, &candidate) {
                    trace!(name = fullname, entry = %candidate, root = %root.display(), "found via search root");
                    return FindOutcome::Found(spec);
                }
            }
        }

        trace!(name = fullname, "declined");
        FindOutcome::Declined
    }

    fn spec_for(&self, fullname: &str, entry_name: &str) -> Option<ModuleSpec> {
        let entry = self.archive.get(entry_name)?;
        let kind = UnitKind::of(entry.type_code)?;
        Some(ModuleSpec {
            name: fullname.to_string(),
            entry_name: entry_name.to_string(),
            kind,
            origin: self.layout.origin(entry_name, kind),
            search_locations: self.layout.search_locations(entry_name, kind),
        })
    }

    /// Run the read pipeline for a found unit and hand its bytes to the host.
    pub fn load(&self, spec: &ModuleSpec) -> Result<LoadedUnit<H::Code>> {
        if spec.kind == UnitKind::NamespacePackage {
            debug!(name = %spec.name, "namespace package loaded");
            return Ok(LoadedUnit {
                spec: spec.clone(),
                code: None,
            });
        }

        let extracted = self.archive.extract(&spec.entry_name)?;
        let code = self
            .host
            .unmarshal(&spec.name, extracted.data)
            .map_err(|source| RuntimeError::UnmarshalFailed {
                name: spec.name.clone(),
                source,
            })?;

        debug!(name = %spec.name, package = spec.is_package(), "unit loaded");
        Ok(LoadedUnit {
            spec: spec.clone(),
            code: Some(code),
        })
    }

    /// Execute a loaded unit. Namespace packages have nothing to run.
    pub fn exec(&self, unit: &LoadedUnit<H::Code>) -> Result<()> {
        let Some(code) = &unit.code else {
            return Ok(());
        };
        self.host
            .execute(&unit.spec, code)
            .map_err(|source| RuntimeError::ExecFailed {
                name: unit.spec.name.clone(),
                source,
            })
    }

    /// `find` then `load`; `Ok(None)` when declined.
    pub fn resolve(
        &self,
        fullname: &str,
        search_roots: Option<&[PathBuf]>,
    ) -> Result<Option<LoadedUnit<H::Code>>> {
        match self.find(fullname, search_roots) {
            FindOutcome::Declined => Ok(None),
            FindOutcome::Found(spec) => self.load(&spec).map(Some),
        }
    }

    fn importable(&self, fullname: &str) -> Result<ModuleSpec> {
        self.find(fullname, None)
            .into_spec()
            .ok_or_else(|| ArchiveError::NameNotFound(fullname.to_string()).into())
    }

    /// Whether `fullname` is a package.
    pub fn is_package(&self, fullname: &str) -> Result<bool> {
        Ok(self.importable(fullname)?.is_package())
    }

    /// Code of `fullname`, `None` for namespace packages.
    pub fn get_code(&self, fullname: &str) -> Result<Option<H::Code>> {
        let spec = self.importable(fullname)?;
        Ok(self.load(&spec)?.code)
    }

    /// Synthesized origin of `fullname`, `None` for namespace packages.
    pub fn get_filename(&self, fullname: &str) -> Result<Option<PathBuf>> {
        Ok(self.importable(fullname)?.origin)
    }

    /// Direct children of `package`; the empty name lists top-level entries.
    pub fn list_children(&self, package: &str) -> Vec<String> {
        self.resources(package).contents()
    }

    /// Whether `package.leaf` is a data resource.
    pub fn is_resource(&self, package: &str, leaf: &str) -> bool {
        self.resources(package).is_resource(leaf)
    }

    /// Bytes of the data resource `package.leaf`.
    pub fn read_resource(&self, package: &str, leaf: &str) -> Result<Vec<u8>> {
        Ok(self.resources(package).read(leaf)?)
    }

    /// Resource view of one package.
    pub fn resources<'a>(&'a self, package: &'a str) -> ResourceReader<'a> {
        ResourceReader::new(&self.archive, package)
    }
}

pub(crate) fn is_hidden(entry: &TocEntry) -> bool {
    entry.type_code == TypeCode::KeyMaterial || entry.name == KEY_ENTRY_NAME
}
