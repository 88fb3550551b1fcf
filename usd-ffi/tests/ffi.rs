//! Drives the exported functions the way a C caller would.

use std::ffi::{CStr, CString, c_char};
use std::path::PathBuf;
use std::ptr;
use std::slice;

use rstest::rstest;

use redlilium_usd::ResultCode;
use redlilium_usd_ffi::*;

fn scene_path() -> CString {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("usd")
        .join("tests")
        .join("data")
        .join("scene.usda");
    CString::new(path.to_str().unwrap()).unwrap()
}

/// Closes the handle on drop.
struct Opened(StageHandle);

impl Drop for Opened {
    fn drop(&mut self) {
        rlusd_close_stage(self.0);
    }
}

fn open() -> Opened {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut handle: StageHandle = 0;
    let code = unsafe { rlusd_open_stage(scene_path().as_ptr(), &mut handle) };
    assert_eq!(code, ResultCode::Success);
    assert_ne!(handle, 0);
    Opened(handle)
}

fn str_at<'a>(ptr: *const c_char) -> &'a str {
    assert!(!ptr.is_null());
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()
}

fn count(f: unsafe extern "C" fn(StageHandle, *mut usize) -> ResultCode, handle: StageHandle) -> usize {
    let mut n = usize::MAX;
    assert_eq!(unsafe { f(handle, &mut n) }, ResultCode::Success);
    n
}

#[test]
fn open_reports_missing_files() {
    let mut handle: StageHandle = 0;
    let missing = CString::new("/definitely/not/here.usda").unwrap();
    assert_eq!(
        unsafe { rlusd_open_stage(missing.as_ptr(), &mut handle) },
        ResultCode::FileNotFound
    );
    assert_eq!(
        unsafe { rlusd_open_stage(scene_path().as_ptr(), ptr::null_mut()) },
        ResultCode::NullArgument
    );
}

#[test]
fn closed_handle_is_rejected() {
    let stage = open();
    let handle = stage.0;
    drop(stage);

    let mut n = 0usize;
    assert_eq!(
        unsafe { rlusd_get_mesh_count(handle, &mut n) },
        ResultCode::InvalidHandle
    );
    let mut mesh = RlusdMesh::default();
    assert_eq!(
        unsafe { rlusd_get_mesh(handle, 0, &mut mesh) },
        ResultCode::InvalidHandle
    );
    assert!(mesh.path.is_null());
    // closing twice is harmless
    rlusd_close_stage(handle);
}

#[test]
fn null_out_pointers() {
    let stage = open();
    let h = stage.0;
    unsafe {
        assert_eq!(rlusd_get_mesh(h, 0, ptr::null_mut()), ResultCode::NullArgument);
        assert_eq!(rlusd_get_instancer(h, 0, ptr::null_mut()), ResultCode::NullArgument);
        assert_eq!(rlusd_get_material(h, 0, ptr::null_mut()), ResultCode::NullArgument);
        assert_eq!(rlusd_get_prim_info(h, 0, ptr::null_mut()), ResultCode::NullArgument);
        assert_eq!(
            rlusd_get_prim_info_by_path(h, ptr::null(), &mut RlusdPrimInfo::default()),
            ResultCode::NullArgument
        );
        assert_eq!(
            rlusd_get_children_count(h, ptr::null(), &mut 0usize),
            ResultCode::NullArgument
        );
        assert_eq!(rlusd_export_stage(h, ptr::null()), ResultCode::NullArgument);
    }
}

#[test]
fn error_message_lookup() {
    assert_eq!(str_at(rlusd_error_message(ResultCode::InvalidHandle as i32)), "Invalid stage handle");
    assert_eq!(str_at(rlusd_error_message(12345)), "Unknown error");
}

#[test]
fn mesh_records() {
    let stage = open();
    let h = stage.0;
    let n = count(rlusd_get_mesh_count, h);
    assert_eq!(n, 7);

    let mut ground = RlusdMesh::default();
    assert_eq!(unsafe { rlusd_get_mesh(h, 0, &mut ground) }, ResultCode::Success);
    assert_eq!(str_at(ground.path), "/World/Ground");
    assert_eq!(ground.vertex_count, 4);
    let indices = unsafe { slice::from_raw_parts(ground.indices, ground.index_count) };
    assert_eq!(indices, [0, 1, 2, 0, 2, 3]);
    assert_eq!(ground.normal_count, 4);
    assert!(!ground.uvs.is_null());
    assert_eq!(ground.transform[13], 1.0);

    let mut pentagon = RlusdMesh::default();
    assert_eq!(unsafe { rlusd_get_mesh(h, 1, &mut pentagon) }, ResultCode::Success);
    assert_eq!(pentagon.normal_count, 0);
    assert!(pentagon.normals.is_null());
    assert!(pentagon.uvs.is_null());

    let mut past_end = RlusdMesh::default();
    assert_eq!(
        unsafe { rlusd_get_mesh(h, n, &mut past_end) },
        ResultCode::InvalidIndex
    );
    assert!(past_end.path.is_null());
}

#[test]
fn instancer_records() {
    let stage = open();
    let h = stage.0;
    assert_eq!(count(rlusd_get_instancer_count, h), 2);

    let mut forest = RlusdInstancer::default();
    assert_eq!(unsafe { rlusd_get_instancer(h, 0, &mut forest) }, ResultCode::Success);
    assert_eq!(str_at(forest.path), "/World/Forest");
    assert_eq!(forest.prototype_count, 2);
    let prototypes = unsafe { slice::from_raw_parts(forest.prototype_paths, forest.prototype_count) };
    assert_eq!(str_at(prototypes[1]), "/World/Forest/Prototypes/Rock");

    assert_eq!(forest.instance_count, 4);
    let selectors = unsafe { slice::from_raw_parts(forest.proto_indices, forest.instance_count) };
    assert_eq!(selectors, [0, 1, 0, 0]);
    let transforms = unsafe { slice::from_raw_parts(forest.transforms, forest.instance_count * 16) };
    assert!((transforms[16] - 0.5).abs() < 1e-5);

    let mut broken = RlusdInstancer::default();
    assert_eq!(unsafe { rlusd_get_instancer(h, 1, &mut broken) }, ResultCode::Success);
    assert_eq!(broken.instance_count, 0);
    assert!(broken.transforms.is_null());
    assert!(broken.proto_indices.is_null());
}

#[test]
fn material_records() {
    let stage = open();
    let h = stage.0;
    assert_eq!(count(rlusd_get_material_count, h), 4);

    let mut painted = RlusdMaterial::default();
    assert_eq!(unsafe { rlusd_get_material(h, 1, &mut painted) }, ResultCode::Success);
    assert_eq!(str_at(painted.path), "/Looks/Painted");
    assert_eq!(painted.diffuse_color, [0.5, 0.5, 0.5]);
    assert!((painted.metallic - 0.25).abs() < 1e-6);
    assert!(str_at(painted.diffuse_texture).ends_with("albedo.png"));
    assert!(painted.roughness_texture.is_null());
    assert!(painted.metallic_texture.is_null());
    assert!(painted.normal_texture.is_null());
    assert!(painted.emissive_texture.is_null());
    assert_eq!(painted.is_materialx, 0);

    let mut graph = RlusdMaterial::default();
    assert_eq!(unsafe { rlusd_get_material(h, 3, &mut graph) }, ResultCode::Success);
    assert_eq!(graph.is_materialx, 1);
    assert_eq!(graph.roughness, 0.5);
}

#[test]
fn mesh_bindings() {
    let stage = open();
    let h = stage.0;
    let mut path: *const c_char = ptr::null();
    unsafe {
        assert_eq!(rlusd_get_mesh_material_path(h, 1, &mut path), ResultCode::Success);
        assert_eq!(str_at(path), "/Looks/Plain");
        assert_eq!(rlusd_get_mesh_material_path(h, 4, &mut path), ResultCode::Success);
        assert_eq!(str_at(path), "/World/Crate/Looks/Wood");
        assert_eq!(rlusd_get_mesh_material_path(h, 7, &mut path), ResultCode::InvalidIndex);
    }
}

#[test]
fn prim_info_by_index_and_path() {
    let stage = open();
    let h = stage.0;
    assert_eq!(count(rlusd_get_prim_count, h), 23);

    let mut first = RlusdPrimInfo::default();
    assert_eq!(unsafe { rlusd_get_prim_info(h, 0, &mut first) }, ResultCode::Success);
    assert_eq!(str_at(first.path), "/World");
    assert_eq!(str_at(first.type_name), "Xform");
    assert_eq!(first.has_children, 1);
    assert_eq!(first.child_count, 7);

    let path = CString::new("/World/Crate").unwrap();
    let mut crate_info = RlusdPrimInfo::default();
    assert_eq!(
        unsafe { rlusd_get_prim_info_by_path(h, path.as_ptr(), &mut crate_info) },
        ResultCode::Success
    );
    assert_eq!(crate_info.is_active, 1);
    assert_eq!(crate_info.child_count, 2);

    // deactivated prims are not part of the hierarchy
    for missing in ["/World/Nope", "/World/Disabled"] {
        let missing = CString::new(missing).unwrap();
        let mut info = RlusdPrimInfo::default();
        assert_eq!(
            unsafe { rlusd_get_prim_info_by_path(h, missing.as_ptr(), &mut info) },
            ResultCode::InvalidIndex
        );
        assert!(info.path.is_null());
    }
}

#[rstest]
#[case::slash("/")]
#[case::empty("")]
fn root_alias_lists_roots(#[case] alias: &str) {
    let stage = open();
    let h = stage.0;
    let alias = CString::new(alias).unwrap();

    let roots = count(rlusd_get_root_prim_count, h);
    let mut children = 0usize;
    assert_eq!(
        unsafe { rlusd_get_children_count(h, alias.as_ptr(), &mut children) },
        ResultCode::Success
    );
    assert_eq!(children, roots);

    for i in 0..roots {
        let mut root: *const c_char = ptr::null();
        let mut child: *const c_char = ptr::null();
        unsafe {
            assert_eq!(rlusd_get_root_prim_path(h, i, &mut root), ResultCode::Success);
            assert_eq!(rlusd_get_child_path(h, alias.as_ptr(), i, &mut child), ResultCode::Success);
        }
        assert_eq!(str_at(root), str_at(child));
    }
    let mut past_end: *const c_char = ptr::null();
    assert_eq!(
        unsafe { rlusd_get_child_path(h, alias.as_ptr(), roots, &mut past_end) },
        ResultCode::InvalidIndex
    );
    assert!(past_end.is_null());
}

#[test]
fn child_paths_of_a_prim() {
    let stage = open();
    let h = stage.0;
    let parent = CString::new("/World/Crate").unwrap();
    let mut n = 0usize;
    assert_eq!(
        unsafe { rlusd_get_children_count(h, parent.as_ptr(), &mut n) },
        ResultCode::Success
    );
    assert_eq!(n, 2);
    let mut child: *const c_char = ptr::null();
    assert_eq!(
        unsafe { rlusd_get_child_path(h, parent.as_ptr(), 1, &mut child) },
        ResultCode::Success
    );
    assert_eq!(str_at(child), "/World/Crate/Looks");
}

#[test]
fn clear_cache_rebuilds_same_records() {
    let stage = open();
    let h = stage.0;
    let mut before = RlusdMesh::default();
    assert_eq!(unsafe { rlusd_get_mesh(h, 4, &mut before) }, ResultCode::Success);
    let before_path = str_at(before.path).to_owned();
    let before_indices =
        unsafe { slice::from_raw_parts(before.indices, before.index_count) }.to_vec();

    assert_eq!(rlusd_clear_cache(h), ResultCode::Success);

    let mut after = RlusdMesh::default();
    assert_eq!(unsafe { rlusd_get_mesh(h, 4, &mut after) }, ResultCode::Success);
    assert_eq!(str_at(after.path), before_path);
    assert_eq!(
        unsafe { slice::from_raw_parts(after.indices, after.index_count) },
        before_indices
    );
    assert_eq!(after.transform, before.transform);
}

#[rstest]
#[case::text("usda")]
#[case::binary("usdc")]
fn export_and_reopen(#[case] extension: &str) {
    let stage = open();
    let out = std::env::temp_dir().join(format!(
        "redlilium_usd_ffi_{}_{extension}.{extension}",
        std::process::id()
    ));
    let out_c = CString::new(out.to_str().unwrap()).unwrap();
    assert_eq!(
        unsafe { rlusd_export_stage(stage.0, out_c.as_ptr()) },
        ResultCode::Success
    );

    let mut handle: StageHandle = 0;
    assert_eq!(
        unsafe { rlusd_open_stage(out_c.as_ptr(), &mut handle) },
        ResultCode::Success
    );
    let reopened = Opened(handle);
    assert_eq!(count(rlusd_get_mesh_count, reopened.0), 7);
    assert_eq!(count(rlusd_get_material_count, reopened.0), 4);
    assert_eq!(count(rlusd_get_prim_count, reopened.0), 23);
    drop(reopened);
    let _ = std::fs::remove_file(&out);
}

#[test]
fn export_to_unknown_extension() {
    let stage = open();
    let out = CString::new(
        std::env::temp_dir()
            .join("redlilium_usd_ffi_out.obj")
            .to_str()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        unsafe { rlusd_export_stage(stage.0, out.as_ptr()) },
        ResultCode::Unknown
    );
}
