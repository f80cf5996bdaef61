//! Engine and server configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EngageError, Result};

pub const DEFAULT_SOCKET: &str = "/tmp/engagedb.sock";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOG_ENV: &str = "ENGAGEDB_LOG";

/// Behaviour switches for [`crate::Engine`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Check that a toggle's target document exists before creating the
    /// relation. Off by default: the relation is a pure reference.
    pub verify_targets: bool,
}

/// Optional JSON config file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    socket: Option<String>,
    log_level: Option<String>,
    verify_targets: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            EngageError::validation(format!("invalid config file {}: {}", path.display(), e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub socket_path: PathBuf,
    pub log_level: String,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Build from command-line arguments (without the program name).
    ///
    /// Precedence: flag > config file > `ENGAGEDB_LOG` > default.
    pub fn from_args(args: &[String]) -> Result<Self> {
        Self::resolve(args, std::env::var(LOG_ENV).ok())
    }

    fn resolve(args: &[String], env_log: Option<String>) -> Result<Self> {
        let mut db_path = None;
        let mut socket = None;
        let mut config_file = None;
        let mut log_level = None;
        let mut verify_targets = false;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| EngageError::validation(format!("{} requires a value", flag)))
            };
            match arg.as_str() {
                "--socket" => socket = Some(value("--socket")?),
                "--config" => config_file = Some(value("--config")?),
                "--log-level" => log_level = Some(value("--log-level")?),
                "--verify-targets" => verify_targets = true,
                flag if flag.starts_with("--") => {
                    return Err(EngageError::validation(format!("unknown flag '{}'", flag)))
                }
                path if db_path.is_none() => db_path = Some(PathBuf::from(path)),
                extra => {
                    return Err(EngageError::validation(format!("unexpected argument '{}'", extra)))
                }
            }
        }

        let db_path = db_path.ok_or_else(|| EngageError::validation("missing <db-path>"))?;
        let file = match config_file {
            Some(path) => FileConfig::load(Path::new(&path))?,
            None => FileConfig::default(),
        };

        Ok(ServerConfig {
            db_path,
            socket_path: PathBuf::from(
                socket
                    .or(file.socket)
                    .unwrap_or_else(|| DEFAULT_SOCKET.to_string()),
            ),
            log_level: log_level
                .or(file.log_level)
                .or(env_log)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            engine: EngineConfig {
                verify_targets: verify_targets || file.verify_targets.unwrap_or(false),
            },
        })
    }
}
