//! Panic injection at worker pull sites (feature: `failpoints`).
//!
//! The macro expands to nothing unless the feature is enabled. When enabled,
//! points whose name starts with `panic_` panic, and points listed in the
//! `RIVULET_FAILPOINTS` environment variable (comma separated) panic too.

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let name: &str = $name;
        if name.starts_with("panic_") || $crate::failpoints::armed(name) {
            panic!("failpoint triggered: {}", name);
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {
        let _ = $name;
    };
}

/// Whether `name` is armed through `RIVULET_FAILPOINTS`.
#[cfg(feature = "failpoints")]
pub fn armed(name: &str) -> bool {
    std::env::var("RIVULET_FAILPOINTS")
        .map(|v| v.split(',').any(|p| p.trim() == name))
        .unwrap_or(false)
}
