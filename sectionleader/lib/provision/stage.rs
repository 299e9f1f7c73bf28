use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use getset::Getters;
use tokio::process::Command;

use crate::{
    config::{LeaderConfig, RootfsSource},
    vm::MachineId,
    LeaderError, LeaderResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Kernel image name inside a machine's directory.
pub const KERNEL_FILENAME: &str = "vmlinux";

/// Root drive name inside a machine's directory.
pub const ROOT_DRIVE_FILENAME: &str = "fs.ext4";

/// Directory a squashfs is unpacked into.
pub const SQUASHFS_ROOT_DIRNAME: &str = "squashfs-root";

/// Log directory inside a machine's directory.
pub const LOG_DIRNAME: &str = "log";

const UNSQUASHFS_BINARY_NAME: &str = "unsquashfs";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The files staged for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct StagedPaths {
    /// The machine's working directory.
    dir: PathBuf,

    /// The copied kernel image.
    kernel_image: PathBuf,

    /// The root drive image.
    root_drive: PathBuf,

    /// Hypervisor stdout log.
    stdout_log: PathBuf,

    /// Hypervisor stderr log.
    stderr_log: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a machine's working directory: kernel copy, root drive, empty log files.
///
/// Any failure is reported as `FilesystemStageFailed`; the caller removes the directory.
pub async fn stage_filesystem(config: &LeaderConfig, id: &MachineId) -> LeaderResult<StagedPaths> {
    let dir = config.vm_dir(id);
    stage_into(config, &dir)
        .await
        .map_err(|e| match e {
            LeaderError::FilesystemStageFailed(_) => e,
            other => LeaderError::FilesystemStageFailed(other.to_string()),
        })
}

/// Removes a machine's working directory. Failures are logged.
pub async fn discard_filesystem(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!(dir = %dir.display(), "removed machine directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove machine directory")
        }
    }
}

async fn stage_into(config: &LeaderConfig, dir: &Path) -> LeaderResult<StagedPaths> {
    tokio::fs::create_dir_all(dir).await?;

    let kernel_image = dir.join(KERNEL_FILENAME);
    tokio::fs::copy(config.get_kernel_image(), &kernel_image)
        .await
        .map_err(|e| {
            LeaderError::FilesystemStageFailed(format!(
                "copying kernel {}: {e}",
                config.get_kernel_image().display()
            ))
        })?;

    let root_drive = dir.join(ROOT_DRIVE_FILENAME);
    match config.get_rootfs() {
        RootfsSource::Image { path } => {
            tokio::fs::copy(path, &root_drive).await.map_err(|e| {
                LeaderError::FilesystemStageFailed(format!(
                    "copying root image {}: {e}",
                    path.display()
                ))
            })?;
        }
        RootfsSource::Squashfs {
            path,
            prepare_script,
        } => {
            let unsquashfs = fcdriver::resolve_binary(None, UNSQUASHFS_BINARY_NAME)
                .map_err(|e| LeaderError::FilesystemStageFailed(e.to_string()))?;
            let unpacked = dir.join(SQUASHFS_ROOT_DIRNAME);
            run(
                Command::new(unsquashfs).arg("-d").arg(&unpacked).arg(path),
                "unsquashfs",
            )
            .await?;
            run(Command::new(prepare_script).arg(dir), "prepare script").await?;

            if !tokio::fs::try_exists(&root_drive).await? {
                return Err(LeaderError::FilesystemStageFailed(format!(
                    "prepare script did not produce {}",
                    root_drive.display()
                )));
            }
        }
    }

    let log_dir = dir.join(LOG_DIRNAME);
    tokio::fs::create_dir_all(&log_dir).await?;
    let stdout_log = log_dir.join("stdout.log");
    let stderr_log = log_dir.join("stderr.log");
    tokio::fs::File::create(&stdout_log).await?;
    tokio::fs::File::create(&stderr_log).await?;

    tracing::debug!(dir = %dir.display(), "staged machine filesystem");
    Ok(StagedPaths {
        dir: dir.to_path_buf(),
        kernel_image,
        root_drive,
        stdout_log,
        stderr_log,
    })
}

async fn run(command: &mut Command, what: &str) -> LeaderResult<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| LeaderError::FilesystemStageFailed(format!("running {what}: {e}")))?;

    if !output.status.success() {
        return Err(LeaderError::FilesystemStageFailed(format!(
            "{what} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
