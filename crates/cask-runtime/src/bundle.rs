//! Bundle bootstrap
//!
//! Opens the configured outer container, optionally descends into the nested
//! container that holds the importable modules, and wires an importer over
//! it. Runtime options and entry-point scripts stay in the outer container.

use std::sync::Arc;

use tracing::{debug, info};

use crate::archive::Archive;
use crate::config::BundleConfig;
use crate::error::{Result, RuntimeError};
use crate::host::HostRuntime;
use crate::importer::{BundleImporter, ModuleSpec, UnitKind};

/// An opened bundle: outer container plus module importer.
pub struct Bundle<H: HostRuntime> {
    container: Arc<Archive>,
    importer: BundleImporter<H>,
}

impl<H: HostRuntime> Bundle<H> {
    /// Open the bundle described by `config`.
    pub fn open(config: &BundleConfig, host: H) -> Result<Self> {
        config.validate()?;
        let options = config.open_options()?;
        let container = Arc::new(Archive::open_with(&config.container.path, &options)?);

        let modules = match &config.container.module_container {
            Some(name) => Arc::new(container.open_nested(name)?),
            None => Arc::clone(&container),
        };

        info!(
            path = %config.container.path.display(),
            entries = container.toc().len(),
            modules = modules.toc().len(),
            "bundle opened"
        );

        let importer = BundleImporter::new(modules, host).with_layout(config.origin_layout());
        Ok(Self {
            container,
            importer,
        })
    }

    /// Outer container.
    pub fn container(&self) -> &Archive {
        &self.container
    }

    /// Module importer.
    pub fn importer(&self) -> &BundleImporter<H> {
        &self.importer
    }

    /// Runtime option flags of the outer container.
    pub fn runtime_options(&self) -> Vec<String> {
        self.container
            .runtime_options()
            .map(str::to_string)
            .collect()
    }

    /// Unmarshal and execute every entry-point script in TOC order.
    /// Stops at the first failure. Returns how many scripts ran.
    pub fn run_scripts(&self) -> Result<usize> {
        let host = self.importer.host();
        let layout = self.importer.layout();

        let mut ran = 0;
        for entry in self.container.scripts() {
            let bytes = self.container.extract_entry(entry)?.data;
            let code = host
                .unmarshal(&entry.name, bytes)
                .map_err(|source| RuntimeError::UnmarshalFailed {
                    name: entry.name.clone(),
                    source,
                })?;

            let spec = ModuleSpec {
                name: entry.name.clone(),
                entry_name: entry.name.clone(),
                kind: UnitKind::Module,
                origin: layout.origin(&entry.name, UnitKind::Module),
                search_locations: None,
            };
            debug!(script = %entry.name, "running script");
            host.execute(&spec, &code)
                .map_err(|source| RuntimeError::ExecFailed {
                    name: entry.name.clone(),
                    source,
                })?;
            ran += 1;
        }
        Ok(ran)
    }
}
