use cellmatch_core::METRIC_ID;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

mod aggregate;
mod binding;
mod error;
mod hooks;
mod matrix;
mod metric;
mod partition;
mod pipeline;
mod rank;
mod select;
mod table;
mod writer;

pub use aggregate::{aggregate_centroids, Aggregation, Centroid, LabelPolicy};
pub use binding::compute_inputs_hash;
pub use error::{GroupSide, InvalidInput, MatchError, RunStage};
pub use hooks::{CancelToken, ProgressEvent, RunHooks};
pub use matrix::{build_score_matrix, CellFailure, MatrixBuild, ScoreMatrix};
pub use metric::{DependenceMetric, DistanceCorrelation};
pub use partition::{partition_centroids, GroupPair, GroupPredicate, LabelEquals};
pub use pipeline::{build_match_matrix, run_match, MatchOutcome, MatchRequest, RunSummary};
pub use rank::{to_ranked_list, RankedPair};
pub use select::{clean_matrix, select_best_match, BestMatch, Selection};
pub use table::{read_delimited, read_jsonl, read_table, EmbeddingRow, EmbeddingTable, TableFormat};
pub use writer::{
    default_export_name, format_score, write_matrix_csv, write_matrix_csv_file, write_ranked_csv,
    write_ranked_csv_file, ExportError, MAX_ROUND_DIGITS,
};

pub const CONFIG_VERSION: &str = "cellmatch_config_v1";

pub fn jcs_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_jcs::to_vec(value)
}

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn config_hash(config: &MatchConfig) -> Result<String, serde_json::Error> {
    Ok(blake3_hex(&jcs_bytes(config)?))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    pub config_version: String,
    pub input: InputConfig,
    pub grouping: GroupingConfig,
    pub metric: MetricConfig,
    pub export: ExportConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub sample_field: String,
    pub label_field: String,
    pub coordinate_prefix: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingConfig {
    /// Centroids with this label form the Left group; all others are Right.
    pub left_label: String,
    pub label_policy: LabelPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricConfig {
    pub metric_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub left_header: String,
    pub right_header: String,
    pub score_header: String,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            input: InputConfig::default(),
            grouping: GroupingConfig::default(),
            metric: MetricConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_field: "sample".to_string(),
            label_field: "dataset".to_string(),
            coordinate_prefix: "PC".to_string(),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            left_label: "CCLE".to_string(),
            label_policy: LabelPolicy::FirstWins,
        }
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            metric_id: METRIC_ID.to_string(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            left_header: "CCLE".to_string(),
            right_header: "Primary Tumor".to_string(),
            score_header: "Distance Correlation".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Env,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("unsupported config_version '{0}'")]
    Version(String),
    #[error("config field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("sample_field and label_field must differ (both '{0}')")]
    SameFields(String),
    #[error("unsupported metric_id '{0}'")]
    UnknownMetric(String),
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::Version(self.config_version.clone()));
        }
        let required = [
            ("input.sample_field", &self.input.sample_field),
            ("input.label_field", &self.input.label_field),
            ("input.coordinate_prefix", &self.input.coordinate_prefix),
            ("grouping.left_label", &self.grouping.left_label),
            ("export.left_header", &self.export.left_header),
            ("export.right_header", &self.export.right_header),
            ("export.score_header", &self.export.score_header),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::EmptyField(*name));
        }
        if self.input.sample_field == self.input.label_field {
            return Err(ConfigError::SameFields(self.input.sample_field.clone()));
        }
        if self.metric.metric_id != METRIC_ID {
            return Err(ConfigError::UnknownMetric(self.metric.metric_id.clone()));
        }
        Ok(())
    }

    pub fn left_predicate(&self) -> LabelEquals {
        LabelEquals(self.grouping.left_label.clone())
    }

    pub fn request(&self, threads: Option<usize>) -> MatchRequest<LabelEquals> {
        MatchRequest::new(
            self.input.sample_field.clone(),
            self.input.label_field.clone(),
            self.left_predicate(),
        )
        .with_label_policy(self.grouping.label_policy)
        .with_threads(threads)
    }
}

/// Reads and validates a JSON config. Missing sections fall back to defaults.
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<MatchConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let config: MatchConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: display,
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Hashes and provenance reported alongside every run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunTrace {
    pub engine_version: String,
    pub metric_id: String,
    pub config_source: ConfigSource,
    pub config_hash: String,
    pub inputs_hash: Option<String>,
}

impl RunTrace {
    pub fn new(
        config: &MatchConfig,
        config_source: ConfigSource,
        inputs_hash: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            metric_id: config.metric.metric_id.clone(),
            config_source,
            config_hash: config_hash(config)?,
            inputs_hash,
        })
    }
}
