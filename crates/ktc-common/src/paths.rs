use std::path::PathBuf;

const SYSTEM_CONFIG_DIR: &str = "/etc/ktc";

/// `$var` if set and non-empty, else `$HOME/<fallback>`, else `/tmp`.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(fallback),
            None => PathBuf::from("/tmp"),
        },
    }
}

pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

pub fn ktc_config_dir() -> PathBuf {
    config_dir().join("ktc")
}

pub fn ktc_system_config_dir() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR)
}

/// Config file candidates for `name`, user first.
pub fn ktc_config_candidates(name: &str) -> [PathBuf; 2] {
    [ktc_config_dir().join(name), ktc_system_config_dir().join(name)]
}

pub fn ktc_data_dir() -> PathBuf {
    data_dir().join("ktc")
}

pub fn ktc_log_dir() -> PathBuf {
    ktc_data_dir().join("logs")
}
