//! Shared fixtures for the stage integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use redlilium_usd::{MemoryStage, Stage, StageConfig};

/// Absolute path of a file under `tests/data`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Opens `tests/data/scene.usda` with the default configuration.
pub fn open_scene() -> Stage<MemoryStage> {
    init_logger();
    Stage::open(fixture("scene.usda")).expect("failed to open scene.usda")
}

/// Opens `tests/data/scene.usda` with `tests/data/stage.toml`.
pub fn open_scene_with_test_config() -> Stage<MemoryStage> {
    init_logger();
    let config = StageConfig::load(&fixture("stage.toml")).expect("failed to load stage.toml");
    Stage::open_with_config(fixture("scene.usda"), config).expect("failed to open scene.usda")
}

/// A fresh path in the system temp directory, unique per call and process.
pub fn temp_path(stem: &str, extension: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "redlilium_usd_{stem}_{}_{n}.{extension}",
        std::process::id()
    ))
}

/// Removes the file when dropped.
pub struct TempFile(pub PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub const TRAVERSAL: [&str; 23] = [
    "/World",
    "/World/Ground",
    "/World/Pentagon",
    "/World/Animated",
    "/World/Degenerate",
    "/World/Crate",
    "/World/Crate/Box",
    "/World/Crate/Looks",
    "/World/Crate/Looks/Wood",
    "/World/Crate/Looks/Wood/Surface",
    "/World/Crate/Looks/Wood/Grain",
    "/World/Forest",
    "/World/Forest/Prototypes",
    "/World/Forest/Prototypes/Tree",
    "/World/Forest/Prototypes/Rock",
    "/World/Broken",
    "/Looks",
    "/Looks/Painted",
    "/Looks/Painted/Surface",
    "/Looks/Painted/Albedo",
    "/Looks/Plain",
    "/Looks/Graph",
    "/Looks/Graph/Surface",
];

pub const MESHES: [&str; 7] = [
    "/World/Ground",
    "/World/Pentagon",
    "/World/Animated",
    "/World/Degenerate",
    "/World/Crate/Box",
    "/World/Forest/Prototypes/Tree",
    "/World/Forest/Prototypes/Rock",
];
