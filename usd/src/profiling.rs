//! Tracy instrumentation for stage opens, exports and cache builds.
//!
//! Enabled with the `profiling` Cargo feature:
//!
//! ```bash
//! cargo test -p redlilium-usd --features profiling
//! ```
//!
//! Each cache build gets a span named after the building function, nested
//! spans split mesh, instancer and material work, and the record count of
//! every finished build is plotted. Without the feature
//! the macros expand to nothing but still evaluate plotted counts.

#[cfg(feature = "profiling")]
pub(crate) use tracy_client::{plot as tracy_plot, span};

/// Span covering the rest of the enclosing function.
macro_rules! profile_function {
    () => {
        #[cfg(feature = "profiling")]
        let _usd_span = $crate::profiling::span!();
    };
}

/// Span covering the rest of the enclosing block.
macro_rules! profile_scope {
    ($name:literal) => {
        #[cfg(feature = "profiling")]
        let _usd_span = $crate::profiling::span!($name);
    };
}

/// Plots the number of records a cache build produced.
macro_rules! profile_records {
    ($records:literal, $count:expr) => {{
        let count: usize = $count;
        #[cfg(feature = "profiling")]
        $crate::profiling::tracy_plot!($records, count as f64);
        #[cfg(not(feature = "profiling"))]
        let _ = count;
    }};
}

pub(crate) use profile_function;
pub(crate) use profile_records;
pub(crate) use profile_scope;
