//! Shared helpers for GPU integration tests.

use std::sync::Arc;

use inkflow::GpuContext;

/// Set to make a missing adapter fail the run instead of skipping.
pub const REQUIRE_GPU_VAR: &str = "INKFLOW_REQUIRE_GPU";

/// Headless context, or `None` (with a note on stderr) when the machine has
/// no usable adapter so the calling test can return early.
///
/// With `INKFLOW_REQUIRE_GPU` set, a missing adapter panics so CI machines
/// that are supposed to have a GPU cannot pass by skipping.
pub fn context() -> Option<Arc<GpuContext>> {
    let _ = env_logger::builder().is_test(true).try_init();
    match pollster::block_on(GpuContext::headless()) {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) if std::env::var_os(REQUIRE_GPU_VAR).is_some() => {
            panic!("{} is set but no GPU context could be created: {}", REQUIRE_GPU_VAR, e)
        }
        Err(e) => {
            eprintln!(
                "skipping GPU test (set {} to make this fail): {}",
                REQUIRE_GPU_VAR, e
            );
            None
        }
    }
}
