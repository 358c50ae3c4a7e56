//! End-to-end resolution tests: build a container on disk, open it, and
//! drive the finder/loader protocol against it.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use cask_format::{BuildOptions, Builder, TocFormat, TypeCode};
use cask_runtime::{
    Archive, Bundle, BundleConfig, BundleImporter, FindOutcome, OpaqueUnits, OriginLayout,
    RuntimeError, UnitKind,
};

use common::{build, write, RecordingHost};

const UNIT: &[u8] = b"\x0b\xad\xc0\xde\x01";

fn sample_layout(format: TocFormat) -> Vec<u8> {
    build(
        BuildOptions::new(format),
        &[
            ("pkg", TypeCode::NamespacePackage, b"", false),
            ("pkg.mod", TypeCode::Module, UNIT, true),
        ],
    )
}

#[test]
fn test_namespace_package_and_module() {
    for format in [TocFormat::FixedStruct, TocFormat::SelfDescribing] {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bundle.bin", &sample_layout(format));

        let archive = Arc::new(Archive::open(&path).unwrap());
        assert_eq!(archive.format(), format);
        let importer = BundleImporter::new(archive, OpaqueUnits);

        let spec = importer.find("pkg.mod", None).into_spec().unwrap();
        assert_eq!(spec.kind, UnitKind::Module);
        let unit = importer.load(&spec).unwrap();
        assert!(!unit.is_package());
        assert_eq!(unit.code.as_deref(), Some(UNIT));

        let pkg = importer.find("pkg", None).into_spec().unwrap();
        assert_eq!(pkg.kind, UnitKind::NamespacePackage);
        assert!(pkg.origin.is_none());
        let pkg_unit = importer.load(&pkg).unwrap();
        assert!(pkg_unit.is_package());
        assert!(pkg_unit.code.is_none());

        assert_eq!(importer.find("pkg.missing", None), FindOutcome::Declined);
    }
}

#[test]
fn test_submodules_resolve_through_package_search_locations() {
    let bytes = build(
        BuildOptions::default(),
        &[
            ("app", TypeCode::Package, b"app", true),
            ("app.sub", TypeCode::Package, b"sub", true),
            ("app.sub.leaf", TypeCode::Module, b"leaf", true),
        ],
    );
    let archive = Arc::new(Archive::from_bytes(bytes).unwrap());
    let importer =
        BundleImporter::new(archive, OpaqueUnits).with_layout(OriginLayout::new("/srv/app"));

    let sub = importer.find("app.sub", None).into_spec().unwrap();
    let locations = sub.search_locations.clone().unwrap();
    assert_eq!(locations, vec![PathBuf::from("/srv/app/app/sub")]);

    // The host renamed the package; only its search path points back here.
    let leaf = importer
        .resolve("renamed.leaf", Some(&locations))
        .unwrap()
        .unwrap();
    assert_eq!(leaf.spec.entry_name, "app.sub.leaf");
    assert_eq!(leaf.code.as_deref(), Some(&b"leaf"[..]));
}

#[test]
fn test_exec_goes_through_host() {
    let bytes = build(
        BuildOptions::default(),
        &[
            ("good", TypeCode::Module, b"fine", true),
            ("raises", TypeCode::Module, b"FAIL at import", true),
        ],
    );
    let archive = Arc::new(Archive::from_bytes(bytes).unwrap());
    let importer = BundleImporter::new(archive, RecordingHost::default());

    let good = importer.resolve("good", None).unwrap().unwrap();
    importer.exec(&good).unwrap();
    assert_eq!(importer.host().executed(), vec!["good"]);

    let raises = importer.resolve("raises", None).unwrap().unwrap();
    let err = importer.exec(&raises).unwrap_err();
    assert!(matches!(err, RuntimeError::ExecFailed { ref name, .. } if name == "raises"));
    assert!(!err.is_not_found());
}

#[test]
fn test_resources() {
    let bytes = build(
        BuildOptions::new(TocFormat::SelfDescribing),
        &[
            ("pkg", TypeCode::Package, b"init", true),
            ("pkg.mod", TypeCode::Module, b"mod", true),
            ("pkg.config", TypeCode::Data, b"{\"debug\": true}", true),
            ("pkg.native", TypeCode::Binary, b"\x7fELF\x02\x01", false),
        ],
    );
    let archive = Arc::new(Archive::from_bytes(bytes).unwrap());
    let importer = BundleImporter::new(archive, OpaqueUnits);

    assert_eq!(importer.list_children("pkg"), vec!["mod", "config", "native"]);
    assert_eq!(importer.list_children(""), vec!["pkg"]);
    assert!(importer.is_resource("pkg", "config"));
    assert!(!importer.is_resource("pkg", "mod"));
    assert_eq!(
        importer.read_resource("pkg", "config").unwrap(),
        b"{\"debug\": true}"
    );
    assert!(importer.read_resource("pkg", "absent").unwrap_err().is_not_found());
}

#[test]
fn test_nested_container_in_place_and_in_memory() {
    let inner = build(
        BuildOptions::new(TocFormat::SelfDescribing),
        &[("inner.mod", TypeCode::Module, b"inner unit", true)],
    );

    let mut builder = Builder::new(Vec::new(), BuildOptions::default()).unwrap();
    builder.add("main", TypeCode::Script, b"entry", true).unwrap();
    builder.add_container("modules", &inner).unwrap();
    let outer = builder.finish().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "outer.bin", &outer);

    let on_disk = Archive::open(&path).unwrap();
    assert_eq!(on_disk.nested_containers().count(), 1);
    let nested = on_disk.open_nested("modules").unwrap();
    assert_eq!(nested.path(), Some(path.as_path()));
    assert_eq!(nested.format(), TocFormat::SelfDescribing);
    assert_eq!(nested.extract("inner.mod").unwrap().data, b"inner unit");

    let in_memory = Archive::from_bytes(outer).unwrap();
    let nested = in_memory.open_nested("modules").unwrap();
    assert_eq!(nested.extract("inner.mod").unwrap().data, b"inner unit");
}

#[test]
fn test_bundle_from_config() {
    let inner = build(
        BuildOptions::default(),
        &[
            ("lib", TypeCode::Package, b"lib init", true),
            ("lib.core", TypeCode::Module, b"core", true),
        ],
    );

    let mut builder = Builder::new(Vec::new(), BuildOptions::default()).unwrap();
    builder.add_option("unbuffered").unwrap();
    builder.add("bootstrap", TypeCode::Script, b"boot", true).unwrap();
    builder.add("main", TypeCode::Script, b"main", true).unwrap();
    builder.add_container("modules", &inner).unwrap();
    let outer = builder.finish().unwrap();

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.bin", &outer);
    let config_path = write(
        dir.path(),
        "cask.toml",
        b"[container]\npath = \"app.bin\"\nmodule_container = \"modules\"\n\n[loader]\nroot = \"/opt/app\"\n",
    );

    let config = BundleConfig::from_file(&config_path).unwrap();
    let bundle = Bundle::open(&config, RecordingHost::default()).unwrap();

    assert_eq!(bundle.runtime_options(), vec!["unbuffered"]);
    assert_eq!(bundle.run_scripts().unwrap(), 2);
    assert_eq!(bundle.importer().host().executed(), vec!["bootstrap", "main"]);

    let importer = bundle.importer();
    assert!(importer.is_package("lib").unwrap());
    assert_eq!(
        importer.get_filename("lib.core").unwrap(),
        Some(PathBuf::from("/opt/app/lib/core.unit"))
    );
    // Scripts live in the outer container, not the module container.
    assert_eq!(importer.find("main", None), FindOutcome::Declined);
}

#[test]
fn test_bundle_open_reports_missing_nested_container() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.bin", &sample_layout(TocFormat::FixedStruct));

    let mut config = BundleConfig::new(dir.path().join("app.bin"));
    config.container.module_container = Some("modules".to_string());

    let err = Bundle::open(&config, OpaqueUnits).err().unwrap();
    assert!(err.is_not_found());
}
