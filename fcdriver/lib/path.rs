//! `fcdriver::path` resolves the binaries the driver shells out to and names the files it uses.

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the Firecracker binary looked up on `PATH`.
pub const FIRECRACKER_BINARY_NAME: &str = "firecracker";

/// The `ip` binary used for network namespace management.
pub const IP_BINARY_NAME: &str = "ip";

/// The CNI command line tool used to run plugin chains.
pub const CNITOOL_BINARY_NAME: &str = "cnitool";

/// Where named network namespaces are mounted.
pub const NETNS_DIR: &str = "/var/run/netns";

/// Permission bits that mark a file as executable by anyone.
const EXECUTABLE_MASK: u32 = 0o111;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves a binary either from an explicit path or by looking `default_name` up on `PATH`.
///
/// The result is guaranteed to exist, to not be a directory and to carry at least one executable
/// permission bit.
pub fn resolve_binary(explicit: Option<&Path>, default_name: &str) -> DriverResult<PathBuf> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => which::which(default_name)
            .map_err(|e| DriverError::BinaryNotFound(default_name.to_string(), e.to_string()))?,
    };

    let metadata = std::fs::metadata(&path)
        .map_err(|e| DriverError::BinaryNotFound(path.display().to_string(), e.to_string()))?;

    if metadata.is_dir() {
        return Err(DriverError::BinaryIsDirectory(path.display().to_string()));
    }

    if metadata.permissions().mode() & EXECUTABLE_MASK == 0 {
        return Err(DriverError::BinaryNotExecutable(
            path.display().to_string(),
        ));
    }

    Ok(path)
}

/// Returns the path of a named network namespace.
pub fn netns_path(name: &str) -> PathBuf {
    Path::new(NETNS_DIR).join(name)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
