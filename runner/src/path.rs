//! Path helper functions

use std::path::PathBuf;

/// Return the root of the workspace.
pub fn get_workspace_path() -> PathBuf {
    // The runner lives one level below the workspace root
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path
}

/// Return the path of the configuration used when none is provided.
pub fn get_default_config_path() -> PathBuf {
    let mut path = get_workspace_path();
    path.push("config.toml");
    path
}

/// Return the manifest of the library.
pub fn get_library_manifest_path() -> PathBuf {
    let mut path = get_workspace_path();
    path.push("src");
    path.push("Cargo.toml");
    path
}
