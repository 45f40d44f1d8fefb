use ktc_common::ktc_config_candidates;
use serde::Deserialize;
use std::path::Path;

fn default_explicit_sync() -> bool {
    true
}
fn default_drm_device() -> String {
    "auto".to_string()
}

fn default_max_objects() -> usize {
    65536
}

fn default_socket_name() -> String {
    "auto".to_string()
}

fn default_log_level() -> String {
    "debug".to_string()
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub limits: LimitsConfig,
    pub socket: SocketConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Advertise wp_linux_drm_syncobj_manager_v1.
    #[serde(default = "default_explicit_sync")]
    pub explicit_sync: bool,

    #[serde(default = "default_drm_device")]
    pub drm_device: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            explicit_sync: default_explicit_sync(),
            drm_device: default_drm_device(),
        }
    }
}

impl SyncConfig {
    pub fn drm_device_path(&self) -> Option<&str> {
        match self.drm_device.as_str() {
            "auto" | "" => None,
            path => Some(path),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    #[serde(default = "default_max_objects")]
    pub max_objects_per_kind: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_objects_per_kind: default_max_objects(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SocketConfig {
    #[serde(default = "default_socket_name")]
    pub name: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            name: default_socket_name(),
        }
    }
}

impl SocketConfig {
    pub fn socket_name(&self) -> Option<&str> {
        match self.name.as_str() {
            "auto" | "" => None,
            name => Some(name),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        for path in &ktc_config_candidates("surface.toml") {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", path.display(), e);
                }
            }
        }

        log::info!("Using default configuration");
        Self::default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.sync.explicit_sync);
        assert_eq!(config.sync.drm_device_path(), None);
        assert_eq!(config.limits.max_objects_per_kind, 65536);
        assert_eq!(config.socket.socket_name(), None);
        assert_eq!(config.debug.log_level, "debug");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [sync]
            drm_device = "/dev/dri/renderD129"

            [socket]
            name = "wayland-7"
            "#,
        )
        .unwrap();
        assert!(config.sync.explicit_sync);
        assert_eq!(config.sync.drm_device_path(), Some("/dev/dri/renderD129"));
        assert_eq!(config.socket.socket_name(), Some("wayland-7"));
        assert_eq!(config.limits.max_objects_per_kind, 65536);
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            [sync]
            explicit_sync = false

            [limits]
            max_objects_per_kind = 16

            [debug]
            log_level = "warn"
            "#,
        )
        .unwrap();
        assert!(!config.sync.explicit_sync);
        assert_eq!(config.limits.max_objects_per_kind, 16);
        assert_eq!(config.debug.log_level, "warn");
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(Config::parse("[limits]\nmax_objects_per_kind = \"many\"").is_err());
    }
}
