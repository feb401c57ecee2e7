use crate::AppError;
use cellmatch_engine::{load_config_file, ConfigSource, MatchConfig, RunTrace};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(super) const CONFIG_ENV_KEY: &str = "CELLMATCH_CONFIG";

pub(super) struct ResolvedConfig {
    pub config: MatchConfig,
    pub source: ConfigSource,
    pub path: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn source_label(&self) -> String {
        match (&self.source, &self.path) {
            (ConfigSource::Default, _) | (_, None) => "default".to_string(),
            (ConfigSource::File, Some(path)) => format!("file:{}", path.display()),
            (ConfigSource::Env, Some(path)) => format!("env:{}", path.display()),
        }
    }

    pub fn run_trace(&self, inputs_hash: Option<String>) -> Result<RunTrace, AppError> {
        RunTrace::new(&self.config, self.source, inputs_hash)
            .map_err(|err| AppError::internal(format!("failed to hash config: {}", err)))
    }
}

/// `--config` wins over `CELLMATCH_CONFIG`, which wins over built-in defaults.
pub(super) fn resolve(flag: Option<&Path>) -> Result<ResolvedConfig, AppError> {
    let env_path = env::var_os(CONFIG_ENV_KEY)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    resolve_from(flag, env_path)
}

fn resolve_from(flag: Option<&Path>, env_path: Option<PathBuf>) -> Result<ResolvedConfig, AppError> {
    let (source, path) = match (flag, env_path) {
        (Some(path), _) => (ConfigSource::File, Some(path.to_path_buf())),
        (None, Some(path)) => (ConfigSource::Env, Some(path)),
        (None, None) => (ConfigSource::Default, None),
    };
    let config = match &path {
        Some(path) => load_config_file(path).map_err(AppError::config)?,
        None => MatchConfig::default(),
    };
    debug!(?source, path = ?path, "config resolved");
    Ok(ResolvedConfig {
        config,
        source,
        path,
    })
}
