//! Per-user system proxy pointer.
//!
//! Points the desktop's automatic proxy configuration at the PAC responder and
//! puts it back on shutdown. Windows uses the `AutoConfigURL` value under the
//! current user's Internet Settings key; GNOME uses `gsettings`. Everything
//! else reports [`SysProxyError::Unsupported`].

use std::process::Command;

use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(windows)]
const INTERNET_SETTINGS_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

const GNOME_PROXY_SCHEMA: &str = "org.gnome.system.proxy";

/// Errors from toggling the system proxy setting.
#[derive(Debug, Error)]
pub enum SysProxyError {
    /// No supported mechanism on this platform.
    #[error("System proxy configuration is not supported on this platform")]
    Unsupported,

    /// The helper program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The helper program exited unsuccessfully.
    #[error("{program} failed: {message}")]
    CommandFailed { program: String, message: String },
}

/// What to put back when the guard is restored.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Previous {
    #[cfg_attr(not(windows), allow(dead_code))]
    Registry,
    #[cfg_attr(any(not(unix), target_os = "macos"), allow(dead_code))]
    Gnome { mode: String, url: String },
}

/// Restores the previous system proxy setting.
///
/// Call [`ProxyToggleGuard::restore`] on shutdown. A guard dropped without
/// being restored restores on drop and logs any failure.
#[derive(Debug)]
pub struct ProxyToggleGuard {
    previous: Option<Previous>,
}

impl ProxyToggleGuard {
    /// Put the previous setting back.
    pub fn restore(mut self) -> Result<(), SysProxyError> {
        match self.previous.take() {
            Some(previous) => restore_previous(&previous),
            None => Ok(()),
        }
    }
}

impl Drop for ProxyToggleGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take()
            && let Err(e) = restore_previous(&previous)
        {
            warn!("Failed to restore system proxy setting: {}", e);
        }
    }
}

/// Point the per-user proxy auto-config at `url`.
pub fn enable_pac(url: &str) -> Result<ProxyToggleGuard, SysProxyError> {
    let previous = set_pac(url)?;
    info!("Enabled per-user PAC: {}", url);
    Ok(ProxyToggleGuard {
        previous: Some(previous),
    })
}

/// Remove any per-user PAC pointer, whoever set it.
pub fn clear_pac() -> Result<(), SysProxyError> {
    clear_platform()?;
    info!("Disabled per-user PAC");
    Ok(())
}

#[cfg(windows)]
fn set_pac(url: &str) -> Result<Previous, SysProxyError> {
    run(
        "reg",
        &[
            "add",
            INTERNET_SETTINGS_KEY,
            "/v",
            "AutoConfigURL",
            "/t",
            "REG_SZ",
            "/d",
            url,
            "/f",
        ],
    )?;
    Ok(Previous::Registry)
}

#[cfg(windows)]
fn clear_platform() -> Result<(), SysProxyError> {
    match run("reg", &["delete", INTERNET_SETTINGS_KEY, "/v", "AutoConfigURL", "/f"]) {
        // Value already absent
        Err(SysProxyError::CommandFailed { message, .. }) if message.contains("unable to find") => {
            Ok(())
        }
        other => other.map(|_| ()),
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn set_pac(url: &str) -> Result<Previous, SysProxyError> {
    let mode = unquote(&run("gsettings", &["get", GNOME_PROXY_SCHEMA, "mode"])?);
    let previous_url = unquote(&run("gsettings", &["get", GNOME_PROXY_SCHEMA, "autoconfig-url"])?);
    debug!("Previous GNOME proxy: mode={} url={}", mode, previous_url);

    run("gsettings", &["set", GNOME_PROXY_SCHEMA, "autoconfig-url", url])?;
    run("gsettings", &["set", GNOME_PROXY_SCHEMA, "mode", "auto"])?;
    Ok(Previous::Gnome {
        mode,
        url: previous_url,
    })
}

#[cfg(all(unix, not(target_os = "macos")))]
fn clear_platform() -> Result<(), SysProxyError> {
    run("gsettings", &["reset", GNOME_PROXY_SCHEMA, "autoconfig-url"])?;
    run("gsettings", &["set", GNOME_PROXY_SCHEMA, "mode", "none"])?;
    Ok(())
}

#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
fn set_pac(_url: &str) -> Result<Previous, SysProxyError> {
    Err(SysProxyError::Unsupported)
}

#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
fn clear_platform() -> Result<(), SysProxyError> {
    Err(SysProxyError::Unsupported)
}

fn restore_previous(previous: &Previous) -> Result<(), SysProxyError> {
    match previous {
        Previous::Registry => clear_platform(),
        Previous::Gnome { mode, url } => {
            run("gsettings", &["set", GNOME_PROXY_SCHEMA, "autoconfig-url", url])?;
            run("gsettings", &["set", GNOME_PROXY_SCHEMA, "mode", mode])?;
            info!("Restored GNOME proxy mode '{}'", mode);
            Ok(())
        }
    }
}

/// Run a helper program and return its trimmed stdout.
fn run(program: &str, args: &[&str]) -> Result<String, SysProxyError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| SysProxyError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(SysProxyError::CommandFailed {
            program: program.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Strip the GVariant quoting `gsettings get` puts around strings.
fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'none'"), "none");
        assert_eq!(unquote("'http://127.0.0.1:18080/proxy.pac'\n"), "http://127.0.0.1:18080/proxy.pac");
        assert_eq!(unquote("''"), "");
        assert_eq!(unquote("auto"), "auto");
    }

    #[test]
    fn test_run_missing_program() {
        let err = run("focus-guard-no-such-helper", &[]).unwrap_err();
        assert!(matches!(err, SysProxyError::Spawn { .. }));
        assert!(err.to_string().contains("focus-guard-no-such-helper"));
    }

    #[test]
    fn test_guard_without_previous_is_noop() {
        let guard = ProxyToggleGuard { previous: None };
        assert!(guard.restore().is_ok());
    }

    #[test]
    fn test_unsupported_display() {
        assert_eq!(
            SysProxyError::Unsupported.to_string(),
            "System proxy configuration is not supported on this platform"
        );
    }
}
