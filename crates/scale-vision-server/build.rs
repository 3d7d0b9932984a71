// crates/scale-vision-server/build.rs
//
// Derives the 4-digit build id from the source tree: SHA-256 over
// (relative path + content hash) of the workspace README plus every .rs
// file under crates/*/src, truncated to 32 bits mod 10000. An identical
// tree always produces an identical id.

use std::env;
use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

fn main() {
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let root = manifest
        .parent()
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .unwrap_or_else(|| manifest.clone());

    let mut files = Vec::new();
    let readme = root.join("README.md");
    if readme.exists() {
        files.push(readme);
    }
    for entry in WalkDir::new(root.join("crates")).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        let in_src = path.components().any(|c| c.as_os_str() == "src");
        if in_src && path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();

    let mut digest = Sha256::new();
    for path in &files {
        let relative = path.strip_prefix(&root).unwrap_or(path);
        digest.update(relative.to_string_lossy().as_bytes());
        if let Ok(bytes) = fs::read(path) {
            digest.update(format!("{:x}", Sha256::digest(&bytes)).as_bytes());
        }
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let hash = digest.finalize();
    let build_num =
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) % 10_000;
    println!("cargo:rustc-env=SCALE_VISION_BUILD_ID={build_num:04}");
}
