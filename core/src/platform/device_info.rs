//! Host device metadata.
//!
//! Best-effort, synchronous lookups. Missing configuration never fails the
//! caller: names come back as `None` and every path falls back to `/tmp`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const FALLBACK_DIR: &str = "/tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Unknown,
    Phone,
    Tablet,
    Laptop,
}

impl DeviceType {
    /// Map a systemd chassis string
    pub fn from_chassis(chassis: &str) -> Self {
        match chassis {
            "phone" | "handset" => DeviceType::Phone,
            "laptop" | "desktop" => DeviceType::Laptop,
            "tablet" => DeviceType::Tablet,
            _ => DeviceType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenStatus {
    Locked,
    Unlocked,
}

/// Metadata provider consumed by the rest of the stack
pub trait DeviceInfo: Send + Sync {
    fn os_device_name(&self) -> Option<String>;
    fn device_type(&self) -> DeviceType;
    fn full_name(&self) -> Option<String>;
    fn profile_user_name(&self) -> Option<String>;
    fn download_path(&self) -> PathBuf;
    fn local_app_data_path(&self) -> PathBuf;
    fn temporary_path(&self) -> PathBuf;
    fn log_path(&self) -> PathBuf;
    fn crash_dump_path(&self) -> PathBuf;

    fn is_screen_locked(&self) -> bool {
        false
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Linux-style provider reading XDG variables and `/etc` files
pub struct HostDeviceInfo {
    app_name: String,
    root: PathBuf,
    env: EnvLookup,
    screen: ScreenLockMonitor,
}

impl HostDeviceInfo {
    /// Provider for the running host
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            root: PathBuf::from("/"),
            env: Box::new(|key: &str| std::env::var(key).ok().filter(|v| !v.is_empty())),
            screen: ScreenLockMonitor::new(),
        }
    }

    /// Provider over a fixed environment and filesystem root
    pub fn with_env(
        app_name: impl Into<String>,
        root: impl Into<PathBuf>,
        vars: HashMap<String, String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            root: root.into(),
            env: Box::new(move |key: &str| vars.get(key).cloned()),
            screen: ScreenLockMonitor::new(),
        }
    }

    pub fn screen_lock(&self) -> &ScreenLockMonitor {
        &self.screen
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    fn read_etc(&self, name: &str) -> Option<String> {
        let path = self.root.join("etc").join(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn machine_info(&self, key: &str) -> Option<String> {
        let contents = self.read_etc("machine-info")?;
        contents.lines().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            if k.trim() != key {
                return None;
            }
            let value = v.trim().trim_matches('"').trim_matches('\'');
            (!value.is_empty()).then(|| value.to_string())
        })
    }

    /// GECOS field of the current user's passwd entry
    fn gecos(&self) -> Option<String> {
        let user = self.var("USER")?;
        let passwd = self.read_etc("passwd")?;
        passwd.lines().find_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.len() > 4 && fields[0] == user).then(|| fields[4].to_string())
        })
    }

    fn xdg_dir(&self, key: &str, suffix: &[&str]) -> PathBuf {
        match self.var(key) {
            Some(dir) => {
                let mut path = PathBuf::from(dir).join(&self.app_name);
                for part in suffix {
                    path.push(part);
                }
                path
            }
            None => PathBuf::from(FALLBACK_DIR),
        }
    }
}

impl DeviceInfo for HostDeviceInfo {
    fn os_device_name(&self) -> Option<String> {
        self.machine_info("PRETTY_HOSTNAME").or_else(|| {
            self.read_etc("hostname")
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
    }

    fn device_type(&self) -> DeviceType {
        self.machine_info("CHASSIS")
            .map(|c| DeviceType::from_chassis(&c))
            .unwrap_or(DeviceType::Unknown)
    }

    fn full_name(&self) -> Option<String> {
        let gecos = self.gecos()?;
        let name = gecos.split(',').next().unwrap_or_default().trim().to_string();
        (!name.is_empty()).then_some(name)
    }

    fn profile_user_name(&self) -> Option<String> {
        self.var("USER")
    }

    fn download_path(&self) -> PathBuf {
        if let Some(dir) = self.var("XDG_DOWNLOAD_DIR") {
            return PathBuf::from(dir);
        }
        match self.var("HOME") {
            Some(home) => Path::new(&home).join("Downloads"),
            None => PathBuf::from(FALLBACK_DIR),
        }
    }

    fn local_app_data_path(&self) -> PathBuf {
        self.xdg_dir("XDG_CONFIG_HOME", &[])
    }

    fn temporary_path(&self) -> PathBuf {
        self.xdg_dir("XDG_RUNTIME_DIR", &[])
    }

    fn log_path(&self) -> PathBuf {
        self.xdg_dir("XDG_STATE_HOME", &["logs"])
    }

    fn crash_dump_path(&self) -> PathBuf {
        self.xdg_dir("XDG_STATE_HOME", &["crashes"])
    }

    fn is_screen_locked(&self) -> bool {
        self.screen.is_locked()
    }
}

type ScreenListener = Arc<dyn Fn(ScreenStatus) + Send + Sync>;

/// Named screen lock listeners. Registering an existing name replaces it.
#[derive(Default)]
pub struct ScreenLockMonitor {
    listeners: RwLock<HashMap<String, ScreenListener>>,
    locked: AtomicBool,
}

impl ScreenLockMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, listener: ScreenListener) {
        self.listeners.write().insert(name.into(), listener);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.listeners.write().remove(name).is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn on_lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        self.notify(ScreenStatus::Locked);
    }

    pub fn on_unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        self.notify(ScreenStatus::Unlocked);
    }

    fn notify(&self, status: ScreenStatus) {
        let listeners: Vec<ScreenListener> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn vars(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_environment_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info = HostDeviceInfo::with_env("Nearcast", dir.path(), HashMap::new());

        assert_eq!(info.download_path(), PathBuf::from("/tmp"));
        assert_eq!(info.local_app_data_path(), PathBuf::from("/tmp"));
        assert_eq!(info.temporary_path(), PathBuf::from("/tmp"));
        assert_eq!(info.log_path(), PathBuf::from("/tmp"));
        assert_eq!(info.crash_dump_path(), PathBuf::from("/tmp"));
        assert_eq!(info.os_device_name(), None);
        assert_eq!(info.full_name(), None);
        assert_eq!(info.profile_user_name(), None);
        assert_eq!(info.device_type(), DeviceType::Unknown);
    }

    #[test]
    fn test_xdg_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info = HostDeviceInfo::with_env(
            "Nearcast",
            dir.path(),
            vars(&[
                ("XDG_CONFIG_HOME", "/home/u/.config"),
                ("XDG_STATE_HOME", "/home/u/.local/state"),
                ("XDG_RUNTIME_DIR", "/run/user/1000"),
                ("HOME", "/home/u"),
            ]),
        );

        assert_eq!(info.local_app_data_path(), PathBuf::from("/home/u/.config/Nearcast"));
        assert_eq!(
            info.log_path(),
            PathBuf::from("/home/u/.local/state/Nearcast/logs")
        );
        assert_eq!(
            info.crash_dump_path(),
            PathBuf::from("/home/u/.local/state/Nearcast/crashes")
        );
        assert_eq!(info.temporary_path(), PathBuf::from("/run/user/1000/Nearcast"));
        assert_eq!(info.download_path(), PathBuf::from("/home/u/Downloads"));
    }

    #[test]
    fn test_etc_lookups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).expect("etc");
        std::fs::write(
            etc.join("machine-info"),
            "PRETTY_HOSTNAME=\"Ada's Laptop\"\nCHASSIS=laptop\n",
        )
        .expect("machine-info");
        std::fs::write(etc.join("hostname"), "ada-lt\n").expect("hostname");
        std::fs::write(
            etc.join("passwd"),
            "root:x:0:0:root:/root:/bin/bash\nada:x:1000:1000:Ada Lovelace,,,:/home/ada:/bin/zsh\n",
        )
        .expect("passwd");

        let info = HostDeviceInfo::with_env("Nearcast", dir.path(), vars(&[("USER", "ada")]));
        assert_eq!(info.os_device_name().as_deref(), Some("Ada's Laptop"));
        assert_eq!(info.device_type(), DeviceType::Laptop);
        assert_eq!(info.full_name().as_deref(), Some("Ada Lovelace"));
        assert_eq!(info.profile_user_name().as_deref(), Some("ada"));
    }

    #[test]
    fn test_hostname_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).expect("etc");
        std::fs::write(etc.join("hostname"), "  box-7 \n").expect("hostname");

        let info = HostDeviceInfo::with_env("Nearcast", dir.path(), HashMap::new());
        assert_eq!(info.os_device_name().as_deref(), Some("box-7"));
    }

    #[test]
    fn test_chassis_mapping() {
        assert_eq!(DeviceType::from_chassis("handset"), DeviceType::Phone);
        assert_eq!(DeviceType::from_chassis("desktop"), DeviceType::Laptop);
        assert_eq!(DeviceType::from_chassis("tablet"), DeviceType::Tablet);
        assert_eq!(DeviceType::from_chassis("server"), DeviceType::Unknown);
    }

    #[test]
    fn test_screen_lock_listeners() {
        let monitor = ScreenLockMonitor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.register("sharing", Arc::new(move |s: ScreenStatus| sink.lock().push(s)));

        monitor.on_lock();
        assert!(monitor.is_locked());
        monitor.on_unlock();
        assert!(monitor.unregister("sharing"));
        assert!(!monitor.unregister("sharing"));
        monitor.on_lock();

        assert_eq!(
            *seen.lock(),
            vec![ScreenStatus::Locked, ScreenStatus::Unlocked]
        );
    }
}
