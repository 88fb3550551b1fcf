//! Export followed by re-open must preserve every extracted record.

mod common;

use rstest::rstest;

use common::{TempFile, open_scene, temp_path};
use redlilium_usd::memory::format::BINARY_MAGIC;
use redlilium_usd::{MemoryStage, ResultCode, Stage};

/// Everything the façade extracts, as owned values.
#[derive(Debug, PartialEq)]
struct Snapshot {
    meshes: Vec<redlilium_usd::CachedMesh>,
    instancers: Vec<redlilium_usd::CachedInstancer>,
    materials: Vec<redlilium_usd::CachedMaterial>,
    bindings: Vec<String>,
    prims: Vec<redlilium_usd::CachedPrimInfo>,
    roots: Vec<String>,
}

fn snapshot(stage: &mut Stage<MemoryStage>) -> Snapshot {
    Snapshot {
        meshes: stage.meshes_owned(),
        instancers: stage.instancers_owned(),
        materials: stage.materials_owned(),
        bindings: stage.materials().bindings().to_vec(),
        prims: stage.prims().iter().cloned().collect(),
        roots: stage.prims().roots().to_vec(),
    }
}

#[rstest]
#[case::text("usda")]
#[case::crate_binary("usdc")]
#[case::generic("usd")]
fn export_round_trip(#[case] extension: &str) {
    let mut original = open_scene();
    let before = snapshot(&mut original);

    let file = TempFile(temp_path("round_trip", extension));
    original.export(&file.0).unwrap();

    let bytes = std::fs::read(&file.0).unwrap();
    assert_eq!(bytes.starts_with(BINARY_MAGIC), extension != "usda");

    let mut reopened = Stage::<MemoryStage>::open(&file.0).unwrap();
    let after = snapshot(&mut reopened);

    assert_eq!(after.meshes.len(), before.meshes.len());
    assert_eq!(after.instancers.len(), before.instancers.len());
    assert_eq!(after.materials.len(), before.materials.len());
    assert_eq!(after.prims.len(), before.prims.len());
    assert_eq!(after, before);
}

#[test]
fn text_export_is_stable() {
    let stage = open_scene();
    let first = TempFile(temp_path("stable_a", "usda"));
    stage.export(&first.0).unwrap();

    let reopened = Stage::<MemoryStage>::open(&first.0).unwrap();
    let second = TempFile(temp_path("stable_b", "usda"));
    reopened.export(&second.0).unwrap();

    let a = std::fs::read_to_string(&first.0).unwrap();
    let b = std::fs::read_to_string(&second.0).unwrap();
    assert_eq!(a, b);
    assert!(a.starts_with("#usda 1.0"));
    // flattening leaves no composition arcs behind
    assert!(!a.contains("references"));
}

#[test]
fn export_to_unknown_extension_fails() {
    let stage = open_scene();
    let path = temp_path("unknown", "obj");
    let result = stage.export(&path);
    assert_eq!(ResultCode::from(&result), ResultCode::Unknown);
    assert!(!path.exists());
}

#[test]
fn export_into_missing_directory_fails() {
    let stage = open_scene();
    let path = std::env::temp_dir()
        .join("redlilium_usd_no_such_dir")
        .join("out.usda");
    assert_eq!(ResultCode::from(&stage.export(&path)), ResultCode::Unknown);
}
