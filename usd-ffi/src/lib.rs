//! C ABI over [`redlilium_usd`].
//!
//! Stages are addressed by opaque `u64` handles. Every accessor follows the
//! same shape: `(handle, [index | path], out) -> ResultCode`. Arguments are
//! checked in a fixed order:
//!
//! 1. a null handle or out-pointer fails with `NullArgument` before anything
//!    else is touched;
//! 2. an unknown or closed handle fails with `InvalidHandle`;
//! 3. the query runs, and any panic is caught and reported as `Unknown`.
//!
//! On failure the out-parameter is left unwritten.
//!
//! # Lifetime contract
//!
//! Pointers written into out-parameters (paths, vertex/index/normal/UV
//! buffers, transform and prototype arrays, texture paths) borrow storage
//! owned by the stage. They stay valid until [`rlusd_close_stage`] or
//! [`rlusd_clear_cache`] is called on the same handle. Copy anything that has
//! to outlive either call.
//!
//! The C declarations live in `include/redlilium_usd.h`.

mod records;
mod registry;
mod strings;

use std::ffi::{CStr, c_char};
use std::path::Path;

use redlilium_usd::{CacheDomain, MemoryStage, ResultCode, Stage, StageError};

pub use records::{RlusdInstancer, RlusdMaterial, RlusdMesh, RlusdPrimInfo};
pub use registry::StageHandle;

use registry::{FfiStage, with_stage};

/// Reads a caller-provided string. `None` for invalid UTF-8.
///
/// # Safety
/// `ptr` must be non-null and point to a NUL-terminated string.
unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Writes `result` to `out` on success and converts it to a code.
///
/// # Safety
/// `out` must be non-null, aligned and writable.
unsafe fn finish<T>(result: Result<T, StageError>, out: *mut T) -> ResultCode {
    match result {
        Ok(value) => {
            unsafe { out.write(value) };
            ResultCode::Success
        }
        Err(e) => {
            log::debug!("FFI call failed: {e}");
            e.code()
        }
    }
}

fn mesh(ffi: &mut FfiStage, index: usize) -> Result<RlusdMesh, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.geometry();
    let generation = stage.generation(CacheDomain::Geometry);
    let geometry = stage.geometry();
    let mesh = geometry.mesh(index)?;
    let strings = strings.geometry(generation, geometry)?;
    Ok(RlusdMesh::new(mesh, &strings.mesh_paths[index]))
}

fn instancer(ffi: &mut FfiStage, index: usize) -> Result<RlusdInstancer, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.geometry();
    let generation = stage.generation(CacheDomain::Geometry);
    let geometry = stage.geometry();
    let instancer = geometry.instancer(index)?;
    let strings = strings.geometry(generation, geometry)?;
    Ok(RlusdInstancer::new(instancer, &strings.instancers[index]))
}

fn material(ffi: &mut FfiStage, index: usize) -> Result<RlusdMaterial, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.materials();
    let generation = stage.generation(CacheDomain::Materials);
    let materials = stage.materials();
    let material = materials.material(index)?;
    let strings = strings.materials(generation, materials)?;
    Ok(RlusdMaterial::new(material, &strings.materials[index]))
}

fn mesh_material_path(ffi: &mut FfiStage, mesh_index: usize) -> Result<*const c_char, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.materials();
    let generation = stage.generation(CacheDomain::Materials);
    let materials = stage.materials();
    materials.mesh_material_path(mesh_index)?;
    let strings = strings.materials(generation, materials)?;
    Ok(strings.bindings[mesh_index].as_ptr())
}

fn prim_info_at(ffi: &mut FfiStage, index: usize) -> Result<RlusdPrimInfo, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.prims();
    let generation = stage.generation(CacheDomain::Prims);
    let prims = stage.prims();
    let prim = prims.get(index)?;
    let strings = strings.prims(generation, prims)?;
    Ok(RlusdPrimInfo::new(
        prim,
        &strings.paths[index],
        &strings.type_names[index],
    ))
}

fn prim_info_by_path(ffi: &mut FfiStage, path: &str) -> Result<RlusdPrimInfo, StageError> {
    let index = ffi
        .stage
        .prims()
        .index_of(path)
        .ok_or_else(|| StageError::NotFound(path.to_string()))?;
    prim_info_at(ffi, index)
}

fn root_path(ffi: &mut FfiStage, index: usize) -> Result<*const c_char, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.prims();
    let generation = stage.generation(CacheDomain::Prims);
    let prims = stage.prims();
    prims.root_path(index)?;
    let strings = strings.prims(generation, prims)?;
    Ok(strings.roots[index].as_ptr())
}

fn child_path(ffi: &mut FfiStage, parent: &str, index: usize) -> Result<*const c_char, StageError> {
    let FfiStage { stage, strings } = ffi;
    stage.prims();
    let generation = stage.generation(CacheDomain::Prims);
    let prims = stage.prims();
    prims.child_path(parent, index)?;
    let children = strings.prims(generation, prims)?.children(prims, parent)?;
    Ok(children[index].as_ptr())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fixed message for a result code. Unrecognised codes map to the
/// `Unknown` message. The returned string is static.
#[unsafe(no_mangle)]
pub extern "C" fn rlusd_error_message(code: i32) -> *const c_char {
    ResultCode::from_raw(code).message_cstr().as_ptr()
}

// ---------------------------------------------------------------------------
// Stage lifetime
// ---------------------------------------------------------------------------

/// Opens and composes the stage at `path` (UTF-8).
///
/// # Safety
/// `path` must be null or a NUL-terminated string; `out_stage` must be null
/// or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_open_stage(
    path: *const c_char,
    out_stage: *mut StageHandle,
) -> ResultCode {
    if path.is_null() || out_stage.is_null() {
        return ResultCode::NullArgument;
    }
    let Some(path) = (unsafe { read_str(path) }) else {
        return ResultCode::FileNotFound;
    };

    let result = Stage::<MemoryStage>::open(Path::new(path)).map(registry::insert);
    unsafe { finish(result, out_stage) }
}

/// Closes a stage and releases every buffer handed out for it. A null or
/// already closed handle is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn rlusd_close_stage(stage: StageHandle) {
    if stage != 0 && !registry::remove(stage) {
        log::warn!("rlusd_close_stage: handle {stage} is not open");
    }
}

/// Drops every cache of the stage. Pointers obtained earlier become invalid.
#[unsafe(no_mangle)]
pub extern "C" fn rlusd_clear_cache(stage: StageHandle) -> ResultCode {
    let result = with_stage(stage, |ffi| {
        ffi.stage.clear_cache();
        ffi.strings = Default::default();
        Ok(())
    });
    ResultCode::from(&result)
}

/// Writes the composed stage to `path`. The format follows the extension:
/// `.usda` text, `.usdc`/`.usd` binary.
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_export_stage(stage: StageHandle, path: *const c_char) -> ResultCode {
    if stage == 0 || path.is_null() {
        return ResultCode::NullArgument;
    }
    let path = unsafe { read_str(path) };
    let result = with_stage(stage, |ffi| {
        let path = path.ok_or_else(|| StageError::Unknown("export path is not UTF-8".into()))?;
        ffi.stage.export(path)
    });
    ResultCode::from(&result)
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// # Safety
/// `out_count` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_mesh_count(stage: StageHandle, out_count: *mut usize) -> ResultCode {
    if stage == 0 || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| Ok(ffi.stage.mesh_count())), out_count) }
}

/// # Safety
/// `out_mesh` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_mesh(
    stage: StageHandle,
    index: usize,
    out_mesh: *mut RlusdMesh,
) -> ResultCode {
    if stage == 0 || out_mesh.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| mesh(ffi, index)), out_mesh) }
}

/// # Safety
/// `out_count` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_instancer_count(
    stage: StageHandle,
    out_count: *mut usize,
) -> ResultCode {
    if stage == 0 || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| Ok(ffi.stage.instancer_count())), out_count) }
}

/// # Safety
/// `out_instancer` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_instancer(
    stage: StageHandle,
    index: usize,
    out_instancer: *mut RlusdInstancer,
) -> ResultCode {
    if stage == 0 || out_instancer.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| instancer(ffi, index)), out_instancer) }
}

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

/// # Safety
/// `out_count` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_material_count(
    stage: StageHandle,
    out_count: *mut usize,
) -> ResultCode {
    if stage == 0 || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| Ok(ffi.stage.material_count())), out_count) }
}

/// # Safety
/// `out_material` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_material(
    stage: StageHandle,
    index: usize,
    out_material: *mut RlusdMaterial,
) -> ResultCode {
    if stage == 0 || out_material.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| material(ffi, index)), out_material) }
}

/// Bound material path of mesh `mesh_index`; an empty string when unbound.
///
/// # Safety
/// `out_path` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_mesh_material_path(
    stage: StageHandle,
    mesh_index: usize,
    out_path: *mut *const c_char,
) -> ResultCode {
    if stage == 0 || out_path.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| mesh_material_path(ffi, mesh_index)), out_path) }
}

// ---------------------------------------------------------------------------
// Prim hierarchy
// ---------------------------------------------------------------------------

/// # Safety
/// `out_count` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_prim_count(stage: StageHandle, out_count: *mut usize) -> ResultCode {
    if stage == 0 || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| Ok(ffi.stage.prim_count())), out_count) }
}

/// Prim `index` in depth-first traversal order.
///
/// # Safety
/// `out_info` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_prim_info(
    stage: StageHandle,
    index: usize,
    out_info: *mut RlusdPrimInfo,
) -> ResultCode {
    if stage == 0 || out_info.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| prim_info_at(ffi, index)), out_info) }
}

/// # Safety
/// `path` must be null or a NUL-terminated string; `out_info` must be null
/// or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_prim_info_by_path(
    stage: StageHandle,
    path: *const c_char,
    out_info: *mut RlusdPrimInfo,
) -> ResultCode {
    if stage == 0 || path.is_null() || out_info.is_null() {
        return ResultCode::NullArgument;
    }
    let path = unsafe { read_str(path) };
    let result = with_stage(stage, |ffi| {
        let path = path.ok_or_else(|| StageError::NotFound("<non-UTF-8 path>".into()))?;
        prim_info_by_path(ffi, path)
    });
    unsafe { finish(result, out_info) }
}

/// # Safety
/// `out_count` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_root_prim_count(
    stage: StageHandle,
    out_count: *mut usize,
) -> ResultCode {
    if stage == 0 || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| Ok(ffi.stage.root_count())), out_count) }
}

/// # Safety
/// `out_path` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_root_prim_path(
    stage: StageHandle,
    index: usize,
    out_path: *mut *const c_char,
) -> ResultCode {
    if stage == 0 || out_path.is_null() {
        return ResultCode::NullArgument;
    }
    unsafe { finish(with_stage(stage, |ffi| root_path(ffi, index)), out_path) }
}

/// Number of children of `parent_path`; `"/"` and `""` list the root prims.
///
/// # Safety
/// `parent_path` must be null or a NUL-terminated string; `out_count` must be
/// null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_children_count(
    stage: StageHandle,
    parent_path: *const c_char,
    out_count: *mut usize,
) -> ResultCode {
    if stage == 0 || parent_path.is_null() || out_count.is_null() {
        return ResultCode::NullArgument;
    }
    let parent = unsafe { read_str(parent_path) };
    let result = with_stage(stage, |ffi| {
        let parent = parent.ok_or_else(|| StageError::NotFound("<non-UTF-8 path>".into()))?;
        ffi.stage.children_count(parent)
    });
    unsafe { finish(result, out_count) }
}

/// # Safety
/// `parent_path` must be null or a NUL-terminated string; `out_path` must be
/// null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rlusd_get_child_path(
    stage: StageHandle,
    parent_path: *const c_char,
    index: usize,
    out_path: *mut *const c_char,
) -> ResultCode {
    if stage == 0 || parent_path.is_null() || out_path.is_null() {
        return ResultCode::NullArgument;
    }
    let parent = unsafe { read_str(parent_path) };
    let result = with_stage(stage, |ffi| {
        let parent = parent.ok_or_else(|| StageError::NotFound("<non-UTF-8 path>".into()))?;
        child_path(ffi, parent, index)
    });
    unsafe { finish(result, out_path) }
}
