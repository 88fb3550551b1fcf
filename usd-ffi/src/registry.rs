//! Process-wide table of open stages.
//!
//! C callers hold plain `u64` ids instead of pointers, so a closed or made-up
//! handle is detected and reported as [`ResultCode::InvalidHandle`] rather
//! than dereferenced. Ids come from a counter and are never reused.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use redlilium_usd::{MemoryStage, Stage, StageError, panic_message};

use crate::strings::StringMirror;

/// Handle of an open stage. `0` is the null handle.
pub type StageHandle = u64;

/// A stage plus the C strings handed out for its current cache contents.
pub struct FfiStage {
    pub stage: Stage<MemoryStage>,
    pub strings: StringMirror,
}

type Entry = Arc<Mutex<FfiStage>>;

static STAGES: OnceLock<Mutex<HashMap<StageHandle, Entry>>> = OnceLock::new();
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn stages() -> &'static Mutex<HashMap<StageHandle, Entry>> {
    STAGES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `stage` and returns its new handle.
pub fn insert(stage: Stage<MemoryStage>) -> StageHandle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let entry = Arc::new(Mutex::new(FfiStage {
        stage,
        strings: StringMirror::default(),
    }));
    stages().lock().insert(handle, entry);
    log::debug!("Registered stage handle {handle}");
    handle
}

/// Unregisters `handle`. Returns false if it was not open.
///
/// The stage is dropped once no in-flight call still holds it.
pub fn remove(handle: StageHandle) -> bool {
    let mut stages = stages().lock();
    let removed = stages.remove(&handle).is_some();
    if removed {
        log::debug!("Closed stage handle {handle} ({} still open)", stages.len());
    }
    removed
}

/// Runs `f` against the stage behind `handle`.
///
/// The registry lock is only held for the lookup; calls on different handles
/// run concurrently, calls on one handle are serialised. A panic inside `f`
/// is caught and reported as [`StageError::Unknown`].
pub fn with_stage<T>(
    handle: StageHandle,
    f: impl FnOnce(&mut FfiStage) -> Result<T, StageError>,
) -> Result<T, StageError> {
    if handle == 0 {
        return Err(StageError::NullArgument);
    }
    let entry = stages()
        .lock()
        .get(&handle)
        .cloned()
        .ok_or(StageError::InvalidHandle)?;

    let mut stage = entry.lock();
    match catch_unwind(AssertUnwindSafe(|| f(&mut stage))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log::error!("Panic in call on stage handle {handle}: {msg}");
            Err(StageError::Unknown(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_stage() -> Stage<MemoryStage> {
        let oracle = MemoryStage::from_usda_str("#usda 1.0\n", None).unwrap();
        Stage::from_oracle(oracle)
    }

    #[test]
    fn handles_are_unique_and_not_reused() {
        let a = insert(empty_stage());
        let b = insert(empty_stage());
        assert_ne!(a, b);
        assert!(remove(a));
        let c = insert(empty_stage());
        assert_ne!(c, a);
        assert!(remove(b));
        assert!(remove(c));
    }

    #[test]
    fn closed_handle_is_invalid() {
        let handle = insert(empty_stage());
        assert!(remove(handle));
        assert!(!remove(handle));
        let err = with_stage(handle, |s| Ok(s.stage.mesh_count())).unwrap_err();
        assert!(matches!(err, StageError::InvalidHandle));
    }

    #[test]
    fn null_handle() {
        let err = with_stage(0, |_| Ok(())).unwrap_err();
        assert!(matches!(err, StageError::NullArgument));
    }

    #[test]
    fn panics_become_unknown() {
        let handle = insert(empty_stage());
        let err = with_stage(handle, |_| -> Result<(), StageError> { panic!("boom") }).unwrap_err();
        assert!(matches!(err, StageError::Unknown(ref m) if m == "boom"));
        // the stage stays usable
        assert_eq!(with_stage(handle, |s| Ok(s.stage.mesh_count())).unwrap(), 0);
        assert!(remove(handle));
    }
}
