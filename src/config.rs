//! Client settings and local/remote path translation.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9000;
const DEFAULT_CONFIG_PATH: &str = ".config/dbgpc/config.toml";

/// Settings of the debug client. Every field has a default, so a config file
/// may set any subset of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbgpConfig {
    /// TCP port to listen for engines on.
    pub port: u16,
    /// Hand a fresh connection to the user right after `init` instead of running it
    /// silently up to the first breakpoint.
    pub break_at_entry: bool,
    pub max_children: String,
    pub max_data: String,
    pub max_depth: String,
    pub path_map: PathMap,
    /// Socket timeout of a promoted session, in seconds.
    pub interactive_timeout_secs: u64,
    /// Poll interval of a silently running session, in milliseconds.
    pub silent_timeout_ms: u64,
    /// How many poll intervals a silent session may take to reach a breakpoint.
    pub silent_retry_budget: u32,
    /// How many read timeouts an acknowledgement may take.
    pub ack_retry_budget: u32,
    /// Stop listening as soon as one session is queued.
    pub once: bool,
    /// Fetch the context of the current frame after each step.
    pub show_context: bool,
}

impl Default for DbgpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            break_at_entry: false,
            max_children: "1024".to_string(),
            max_data: "1024".to_string(),
            max_depth: "1".to_string(),
            path_map: PathMap::default(),
            interactive_timeout_secs: 30,
            silent_timeout_ms: 1000,
            silent_retry_budget: 600,
            ack_retry_budget: 3,
            once: false,
            show_context: false,
        }
    }
}

impl DbgpConfig {
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_secs)
    }

    pub fn silent_timeout(&self) -> Duration {
        Duration::from_millis(self.silent_timeout_ms)
    }

    pub fn from_toml(data: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(data)
    }

    /// Load settings from `path`, or from `~/.config/dbgpc/config.toml` when no path is given.
    /// A missing default file yields default settings, any other failure is logged
    /// and default settings are used too.
    pub fn load(path: Option<&Path>) -> Self {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match home::home_dir() {
                Some(home) => (home.join(DEFAULT_CONFIG_PATH), false),
                None => return Self::default(),
            },
        };

        if !explicit && !path.exists() {
            return Self::default();
        }

        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!(target: "dbgp", "load config {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&data)?)
    }
}

/// Ordered list of `(local prefix, remote prefix)` pairs. The first pair whose prefix
/// matches wins. Separators are normalized to `/` on both sides.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(from = "Vec<(String, String)>")]
pub struct PathMap {
    entries: Vec<(String, String)>,
}

impl From<Vec<(String, String)>> for PathMap {
    fn from(entries: Vec<(String, String)>) -> Self {
        Self::new(entries)
    }
}

impl PathMap {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(local, remote)| (normalize(&local), normalize(&remote)))
            .filter(|(local, remote)| !local.is_empty() && !remote.is_empty())
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Translate a local file path into the file URI the engine knows.
    pub fn remote_of(&self, local: &str) -> String {
        let local = normalize(local);
        let remote = self
            .entries
            .iter()
            .find_map(|(l, r)| local.strip_prefix(l.as_str()).map(|rest| format!("{r}{rest}")))
            .unwrap_or(local);
        to_file_uri(&remote)
    }

    /// Translate an engine file URI into a local file path.
    pub fn local_of(&self, remote: &str) -> String {
        let remote = strip_file_uri(&normalize(remote));
        self.entries
            .iter()
            .find_map(|(l, r)| remote.strip_prefix(r.as_str()).map(|rest| format!("{l}{rest}")))
            .unwrap_or(remote)
    }
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/")
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn to_file_uri(path: &str) -> String {
    if path.starts_with("file://") {
        path.to_string()
    } else if has_drive_letter(path) {
        format!("file:///{path}")
    } else {
        format!("file://{path}")
    }
}

fn strip_file_uri(uri: &str) -> String {
    let Some(path) = uri.strip_prefix("file://") else {
        return uri.to_string();
    };
    match path.strip_prefix('/') {
        Some(rest) if has_drive_letter(rest) => rest.to_string(),
        _ => path.to_string(),
    }
}
