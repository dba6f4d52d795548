// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::params::ServiceRestart;
use crate::plan::InstanceName;

const SERVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not supported on this platform")]
    Unsupported,

    #[error("wireguard interface error: {0}")]
    Interface(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: &'static str,
        status: String,
        stderr: String,
    },

    #[error("service {0} is not active")]
    ServiceInactive(String),
}

/// Host operations wgbatch relies on. Tests swap in a recording double.
pub trait Platform {
    /// The subset of `tools` that cannot be found on `PATH`.
    fn missing_tools(tools: &[&str]) -> Vec<String>;
    fn interface_exists(name: &str) -> impl Future<Output = Result<bool, PlatformError>> + Send;
    fn quick_up(config: &Path) -> impl Future<Output = Result<(), PlatformError>> + Send;
    fn quick_down(config: &Path) -> impl Future<Output = Result<(), PlatformError>> + Send;
    fn delete_link(name: &str) -> impl Future<Output = Result<(), PlatformError>> + Send;
    fn restart_service(name: &str) -> impl Future<Output = Result<(), PlatformError>> + Send;
    fn service_active(name: &str) -> impl Future<Output = Result<bool, PlatformError>> + Send;
}

#[cfg(target_os = "linux")]
pub type CurrentPlatform = linux::LinuxPlatform;

#[cfg(not(target_os = "linux"))]
pub type CurrentPlatform = StubPlatform;

// -- Lifecycle controller --

/// Bring `name` up from `config`. An interface that already exists counts as
/// active.
pub async fn activate<P: Platform>(name: &InstanceName, config: &Path) -> bool {
    match P::interface_exists(name.as_str()).await {
        Ok(true) => {
            debug!(interface = %name, "interface already up");
            return true;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(interface = %name, error = %e, "could not query interface, bringing it up anyway");
        }
    }

    match P::quick_up(config).await {
        Ok(()) => {
            info!(interface = %name, "interface up");
            true
        }
        Err(e) => {
            warn!(interface = %name, error = %e, "failed to bring interface up");
            false
        }
    }
}

/// Take `name` down. Falls back to deleting the link when wg-quick fails;
/// returns `false` only if the link could not be removed either.
pub async fn deactivate<P: Platform>(name: &InstanceName, config: &Path) -> bool {
    match P::interface_exists(name.as_str()).await {
        Ok(false) => {
            debug!(interface = %name, "interface already down");
            return true;
        }
        Ok(true) => {}
        Err(e) => {
            warn!(interface = %name, error = %e, "could not query interface, taking it down anyway");
        }
    }

    let Err(e) = P::quick_down(config).await else {
        info!(interface = %name, "interface down");
        return true;
    };
    warn!(interface = %name, error = %e, "wg-quick down failed, deleting link");

    match P::delete_link(name.as_str()).await {
        Ok(()) => {
            info!(interface = %name, "link deleted");
            true
        }
        Err(e) => {
            error!(interface = %name, error = %e, "failed to delete link");
            false
        }
    }
}

/// Restart the dashboard service and wait until systemd reports it active,
/// then give it `grace` to rescan the config directory.
pub async fn restart_and_wait<P: Platform>(restart: &ServiceRestart) -> Result<(), PlatformError> {
    info!(service = %restart.service, "restarting dashboard service");
    P::restart_service(&restart.service).await?;

    let deadline = tokio::time::Instant::now() + restart.timeout;
    loop {
        if P::service_active(&restart.service).await? {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            error!(service = %restart.service, timeout = ?restart.timeout, "service did not come back");
            return Err(PlatformError::ServiceInactive(restart.service.clone()));
        }
        tokio::time::sleep(SERVICE_POLL_INTERVAL).await;
    }

    info!(service = %restart.service, "service active");
    tokio::time::sleep(restart.grace).await;
    Ok(())
}

// -- Helper utilities --

async fn run_tool(program: &'static str, args: &[&OsStr]) -> Result<(), PlatformError> {
    debug!(program, ?args, "running tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| PlatformError::Spawn { program, source })?;

    if output.status.success() {
        return Ok(());
    }
    Err(PlatformError::Command {
        program,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

async fn quick(action: &str, config: &Path) -> Result<(), PlatformError> {
    run_tool("wg-quick", &[OsStr::new(action), config.as_os_str()]).await
}

async fn systemctl_restart(name: &str) -> Result<(), PlatformError> {
    run_tool("systemctl", &[OsStr::new("restart"), OsStr::new(name)]).await
}

async fn systemctl_is_active(name: &str) -> Result<bool, PlatformError> {
    let args = [OsStr::new("is-active"), OsStr::new("--quiet"), OsStr::new(name)];
    match run_tool("systemctl", &args).await {
        Ok(()) => Ok(true),
        Err(PlatformError::Command { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

// -- Stub platform for non-Linux --

pub struct StubPlatform;

impl Platform for StubPlatform {
    fn missing_tools(tools: &[&str]) -> Vec<String> {
        tools.iter().map(|t| t.to_string()).collect()
    }

    async fn interface_exists(_name: &str) -> Result<bool, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn quick_up(_config: &Path) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn quick_down(_config: &Path) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn delete_link(_name: &str) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn restart_service(_name: &str) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    async fn service_active(_name: &str) -> Result<bool, PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

// -- Linux implementation --

#[cfg(target_os = "linux")]
pub mod linux {
    use std::path::Path;

    use tracing::debug;
    use wireguard_uapi::RouteSocket;

    use super::{Platform, PlatformError, quick, systemctl_is_active, systemctl_restart};

    pub struct LinuxPlatform;

    impl Platform for LinuxPlatform {
        fn missing_tools(tools: &[&str]) -> Vec<String> {
            tools
                .iter()
                .filter(|tool| which::which(tool).is_err())
                .map(|tool| tool.to_string())
                .collect()
        }

        async fn interface_exists(name: &str) -> Result<bool, PlatformError> {
            let mut route = RouteSocket::connect()
                .map_err(|e| PlatformError::Interface(e.to_string()))?;
            let existing = route.list_device_names()
                .map_err(|e| PlatformError::Interface(e.to_string()))?;
            let exists = existing.iter().any(|n| n == name);
            debug!(interface = name, exists, "queried wireguard devices");
            Ok(exists)
        }

        async fn quick_up(config: &Path) -> Result<(), PlatformError> {
            quick("up", config).await
        }

        async fn quick_down(config: &Path) -> Result<(), PlatformError> {
            quick("down", config).await
        }

        async fn delete_link(name: &str) -> Result<(), PlatformError> {
            let mut route = RouteSocket::connect()
                .map_err(|e| PlatformError::Interface(e.to_string()))?;
            route.del_device(name)
                .map_err(|e| PlatformError::Interface(e.to_string()))?;
            Ok(())
        }

        async fn restart_service(name: &str) -> Result<(), PlatformError> {
            systemctl_restart(name).await
        }

        async fn service_active(name: &str) -> Result<bool, PlatformError> {
            systemctl_is_active(name).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, MutexGuard};

    use super::*;

    // Recording double; the statics are shared, so every test holds TEST_LOCK.
    static TEST_LOCK: Mutex<()> = Mutex::new(());
    static CALLS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static EXISTS: AtomicBool = AtomicBool::new(false);
    static FAIL_UP: AtomicBool = AtomicBool::new(false);
    static FAIL_DOWN: AtomicBool = AtomicBool::new(false);
    static FAIL_DELETE: AtomicBool = AtomicBool::new(false);
    static SERVICE_ACTIVE: AtomicBool = AtomicBool::new(true);

    fn record(call: String) {
        CALLS.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn calls() -> Vec<String> {
        CALLS.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn failure(program: &'static str) -> PlatformError {
        PlatformError::Command {
            program,
            status: "exit status: 1".into(),
            stderr: String::new(),
        }
    }

    fn lock_and_reset() -> MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        CALLS.lock().unwrap_or_else(|e| e.into_inner()).clear();
        EXISTS.store(false, Ordering::SeqCst);
        FAIL_UP.store(false, Ordering::SeqCst);
        FAIL_DOWN.store(false, Ordering::SeqCst);
        FAIL_DELETE.store(false, Ordering::SeqCst);
        SERVICE_ACTIVE.store(true, Ordering::SeqCst);
        guard
    }

    struct RecordingPlatform;

    impl Platform for RecordingPlatform {
        fn missing_tools(_tools: &[&str]) -> Vec<String> {
            Vec::new()
        }

        async fn interface_exists(_name: &str) -> Result<bool, PlatformError> {
            Ok(EXISTS.load(Ordering::SeqCst))
        }

        async fn quick_up(_config: &Path) -> Result<(), PlatformError> {
            record("up".into());
            if FAIL_UP.load(Ordering::SeqCst) {
                return Err(failure("wg-quick"));
            }
            EXISTS.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn quick_down(_config: &Path) -> Result<(), PlatformError> {
            record("down".into());
            if FAIL_DOWN.load(Ordering::SeqCst) {
                return Err(failure("wg-quick"));
            }
            EXISTS.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_link(name: &str) -> Result<(), PlatformError> {
            record(format!("delete {name}"));
            if FAIL_DELETE.load(Ordering::SeqCst) {
                return Err(PlatformError::Interface("operation not permitted".into()));
            }
            EXISTS.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn restart_service(name: &str) -> Result<(), PlatformError> {
            record(format!("restart {name}"));
            Ok(())
        }

        async fn service_active(_name: &str) -> Result<bool, PlatformError> {
            Ok(SERVICE_ACTIVE.load(Ordering::SeqCst))
        }
    }

    fn ap1() -> (InstanceName, std::path::PathBuf) {
        let name = InstanceName::new("AP", 1, 1);
        let path = name.config_path(Path::new("/etc/wireguard"));
        (name, path)
    }

    fn restart(timeout: Duration) -> ServiceRestart {
        ServiceRestart {
            service: "wg-dashboard".into(),
            timeout,
            grace: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn activate_accepts_interface_already_up() {
        let _guard = lock_and_reset();
        EXISTS.store(true, Ordering::SeqCst);
        let (name, path) = ap1();

        assert!(activate::<RecordingPlatform>(&name, &path).await);
        assert!(calls().is_empty(), "wg-quick up must not run");
    }

    #[tokio::test]
    async fn activate_brings_interface_up() {
        let _guard = lock_and_reset();
        let (name, path) = ap1();

        assert!(activate::<RecordingPlatform>(&name, &path).await);
        assert_eq!(calls(), ["up"]);
    }

    #[tokio::test]
    async fn activate_reports_failed_up() {
        let _guard = lock_and_reset();
        FAIL_UP.store(true, Ordering::SeqCst);
        let (name, path) = ap1();

        assert!(!activate::<RecordingPlatform>(&name, &path).await);
    }

    #[tokio::test]
    async fn deactivate_accepts_interface_already_down() {
        let _guard = lock_and_reset();
        let (name, path) = ap1();

        assert!(deactivate::<RecordingPlatform>(&name, &path).await);
        assert!(calls().is_empty());
    }

    #[tokio::test]
    async fn deactivate_falls_back_to_deleting_link() {
        let _guard = lock_and_reset();
        EXISTS.store(true, Ordering::SeqCst);
        FAIL_DOWN.store(true, Ordering::SeqCst);
        let (name, path) = ap1();

        assert!(deactivate::<RecordingPlatform>(&name, &path).await);
        assert_eq!(calls(), ["down", "delete AP1"]);
        assert!(!EXISTS.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deactivate_fails_when_link_survives() {
        let _guard = lock_and_reset();
        EXISTS.store(true, Ordering::SeqCst);
        FAIL_DOWN.store(true, Ordering::SeqCst);
        FAIL_DELETE.store(true, Ordering::SeqCst);
        let (name, path) = ap1();

        assert!(!deactivate::<RecordingPlatform>(&name, &path).await);
        assert_eq!(calls(), ["down", "delete AP1"]);
    }

    #[tokio::test]
    async fn restart_returns_once_service_is_active() {
        let _guard = lock_and_reset();

        restart_and_wait::<RecordingPlatform>(&restart(Duration::from_secs(15)))
            .await
            .unwrap();
        assert_eq!(calls(), ["restart wg-dashboard"]);
    }

    #[tokio::test]
    async fn restart_times_out_when_service_stays_inactive() {
        let _guard = lock_and_reset();
        SERVICE_ACTIVE.store(false, Ordering::SeqCst);

        let result = restart_and_wait::<RecordingPlatform>(&restart(Duration::ZERO)).await;

        assert!(matches!(result, Err(PlatformError::ServiceInactive(s)) if s == "wg-dashboard"));
    }

    #[test]
    fn stub_platform_has_no_tools() {
        assert_eq!(StubPlatform::missing_tools(&["wg-quick", "wg"]), ["wg-quick", "wg"]);
    }
}
