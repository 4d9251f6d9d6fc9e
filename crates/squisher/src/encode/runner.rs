//! Process execution shared by all encoder adapters.

use super::EncodeError;
use crate::format::ImageFormat;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::debug;
use uuid::Uuid;

/// Suffix shared by every temp artifact; leftovers are swept on startup.
pub const TEMP_SUFFIX: &str = ".squish-tmp";

/// How long to wait for stderr after the encoder has exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Keep error messages to a readable size.
const STDERR_LIMIT: usize = 512;

#[cfg(target_os = "macos")]
const FALLBACK_TOOL_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin"];

#[cfg(target_os = "windows")]
const FALLBACK_TOOL_DIRS: &[&str] = &[
    "C:\\Program Files\\libjxl\\bin",
    "C:\\Program Files (x86)\\libjxl\\bin",
    "C:\\Program Files\\libwebp\\bin",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const FALLBACK_TOOL_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin"];

/// Find an encoder binary on `PATH`, then in the platform's usual install dirs.
pub fn locate_tool(name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };

    let path_dirs = env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    path_dirs
        .into_iter()
        .chain(FALLBACK_TOOL_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Unique temp path in the source's own directory, so the final rename never
/// crosses a filesystem boundary.
///
/// Format: `.<file name>.<8 hex>.<tag>.squish-tmp`
pub fn temp_artifact_path(source: &Path, format: ImageFormat) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let unique = Uuid::new_v4().simple().to_string();

    dir.join(format!(
        ".{}.{}.{}{}",
        file_name,
        &unique[..8],
        format.tag(),
        TEMP_SUFFIX
    ))
}

fn tool_name(cmd: &Command) -> String {
    Path::new(cmd.as_std().get_program())
        .file_name()
        .unwrap_or_else(|| OsStr::new("encoder"))
        .to_string_lossy()
        .into_owned()
}

fn discard(output: &Path) {
    if output.exists() {
        let _ = std::fs::remove_file(output);
    }
}

fn trim_stderr(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= STDERR_LIMIT {
        return trimmed.to_string();
    }
    let mut cut = STDERR_LIMIT;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

/// Start the encoder as the leader of a new process group, so wrapper
/// scripts and their children can be killed together.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The encoder leads its own group; its pid is the group id.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Kill the encoder and everything it started, then reap it.
async fn terminate(child: &mut Child) {
    kill_process_group(child);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Run an encoder command under `budget`.
///
/// On expiry the encoder's whole process group is killed and reaped before returning
/// [`EncodeError::Timeout`]. On every failure path `output` is removed.
pub async fn run_encoder(
    mut cmd: Command,
    output: &Path,
    budget: Duration,
) -> Result<(), EncodeError> {
    let tool = tool_name(&cmd);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            discard(output);
            return Err(EncodeError::EncoderUnavailable(tool));
        }
        Err(e) => {
            discard(output);
            return Err(EncodeError::Io(e));
        }
    };

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let status = match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            terminate(&mut child).await;
            if let Some(task) = stderr_task {
                task.abort();
            }
            discard(output);
            return Err(EncodeError::Io(e));
        }
        Err(_) => {
            debug!(tool = %tool, ?budget, "conversion timed out, killing encoder");
            terminate(&mut child).await;
            if let Some(task) = stderr_task {
                task.abort();
            }
            discard(output);
            return Err(EncodeError::Timeout(budget));
        }
    };

    let stderr = match stderr_task {
        Some(task) => match tokio::time::timeout(STDERR_GRACE, task).await {
            Ok(Ok(text)) => trim_stderr(&text),
            _ => String::new(),
        },
        None => String::new(),
    };

    if !status.success() {
        discard(output);
        return match status.code() {
            Some(code) => Err(EncodeError::Failed { tool, code, stderr }),
            None => Err(EncodeError::Terminated(tool)),
        };
    }

    if !output.exists() {
        return Err(EncodeError::MissingOutput(tool));
    }

    Ok(())
}
