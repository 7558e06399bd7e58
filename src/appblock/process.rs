//! Process table access.
//!
//! [`ProcessTable`] is the seam between the scan loop and the OS. The real
//! implementation sits on `sysinfo`; tests substitute a fake.

use std::path::PathBuf;
use std::sync::Mutex;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use super::error::{AppBlockError, ProcessError};

/// Names are always refreshed; only the exe path is needed beyond that.
fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet)
}

/// One entry of a process snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Process name as reported by the OS.
    pub name: String,
    /// Executable path, when readable.
    pub exe: Option<PathBuf>,
}

impl ProcessInfo {
    /// Name used in audit lines: the exe basename, else the process name.
    pub fn display_name(&self) -> String {
        self.exe
            .as_deref()
            .and_then(|exe| exe.file_name())
            .map(|base| base.to_string_lossy().into_owned())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Operations the app blocker needs from the OS.
///
/// Calls are blocking and may be slow; the scan loop runs them off the async
/// workers.
pub trait ProcessTable: Send + Sync {
    /// Enumerate running processes.
    fn snapshot(&self) -> Result<Vec<ProcessInfo>, AppBlockError>;

    /// Ask a process to exit.
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Force a process to exit.
    fn kill(&self, pid: u32) -> Result<(), ProcessError>;

    /// Whether a process is still running.
    fn is_alive(&self, pid: u32) -> bool;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl SysinfoProcessTable {
    /// Create an empty table; the first snapshot populates it.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    #[cfg(not(unix))]
    fn with_process<T>(
        &self,
        pid: u32,
        f: impl FnOnce(&sysinfo::Process) -> T,
    ) -> Result<T, ProcessError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| ProcessError::Other("process table lock poisoned".to_string()))?;
        let pid = sysinfo::Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            refresh_kind(),
        );
        system.process(pid).map(f).ok_or(ProcessError::ProcessGone)
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessInfo>, AppBlockError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| AppBlockError::Snapshot("process table lock poisoned".to_string()))?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            refresh_kind(),
        );

        Ok(system
            .processes()
            .values()
            .map(|process| ProcessInfo {
                pid: process.pid().as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(|p| p.to_path_buf()),
            })
            .collect())
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        signal(pid, Some(nix::sys::signal::Signal::SIGTERM))
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        // No graceful signal here: TerminateProcess
        self.kill(pid)
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        signal(pid, Some(nix::sys::signal::Signal::SIGKILL))
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        if self.with_process(pid, |process| process.kill())? {
            Ok(())
        } else if self.is_alive(pid) {
            Err(ProcessError::AccessDenied)
        } else {
            Err(ProcessError::ProcessGone)
        }
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // Signal 0 only checks existence; EPERM still means it exists
        !matches!(signal(pid, None), Err(ProcessError::ProcessGone))
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        self.with_process(pid, |_| ()).is_ok()
    }
}

#[cfg(unix)]
fn signal(pid: u32, signal: Option<nix::sys::signal::Signal>) -> Result<(), ProcessError> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| ProcessError::Other(format!("invalid pid {}", pid)))?;
    kill(Pid::from_raw(raw), signal).map_err(ProcessError::from)
}
