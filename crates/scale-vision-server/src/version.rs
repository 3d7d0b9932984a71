// crates/scale-vision-server/src/version.rs

/// Crate version from Cargo.toml.
pub const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 4-digit decimal derived from the source tree hash (see build.rs).
pub const BUILD_ID: &str = env!("SCALE_VISION_BUILD_ID");

/// The externally visible version: `<base>.<build4>`.
pub fn visible_version() -> String {
    format!("{BASE_VERSION}.{BUILD_ID}")
}
