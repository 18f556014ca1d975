//! Run configuration: an optional TOML file overlaid with command-line values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Significance level used when thresholding is enabled without an explicit alpha.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Cortical hemisphere the surface data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Hemisphere {
    #[default]
    L,
    R,
}

impl Hemisphere {
    /// Short label used in output file names.
    pub fn label(self) -> &'static str {
        match self {
            Self::L => "L",
            Self::R => "R",
        }
    }

    /// Anatomical structure name recorded in spatial output metadata.
    pub fn structure(self) -> &'static str {
        match self {
            Self::L => "CortexLeft",
            Self::R => "CortexRight",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error(
        "The required setting '{0}' was provided neither on the command line nor in the config file."
    )]
    MissingField(&'static str),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Partially specified settings, as read from a config file or the command line.
///
/// Every field is optional so that sources can be layered; [`RunConfigFile::resolve`]
/// validates the merged result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigFile {
    pub subject_list: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub group_components: Option<PathBuf>,
    pub extension: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub out_base: Option<String>,
    pub hemisphere: Option<Hemisphere>,
    pub confidence: Option<bool>,
    pub alpha: Option<f64>,
    pub threads: Option<usize>,
}

impl RunConfigFile {
    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Layers `overrides` on top of `self`; any value set in `overrides` wins.
    pub fn overlay(self, overrides: RunConfigFile) -> RunConfigFile {
        RunConfigFile {
            subject_list: overrides.subject_list.or(self.subject_list),
            data_dir: overrides.data_dir.or(self.data_dir),
            group_components: overrides.group_components.or(self.group_components),
            extension: overrides.extension.or(self.extension),
            out_dir: overrides.out_dir.or(self.out_dir),
            out_base: overrides.out_base.or(self.out_base),
            hemisphere: overrides.hemisphere.or(self.hemisphere),
            confidence: overrides.confidence.or(self.confidence),
            alpha: overrides.alpha.or(self.alpha),
            threads: overrides.threads.or(self.threads),
        }
    }

    /// Validates the merged settings and fills in defaults.
    pub fn resolve(self) -> Result<RunConfig, ConfigError> {
        let confidence = self.confidence.unwrap_or(false);
        let alpha = if confidence {
            let alpha = self.alpha.unwrap_or(DEFAULT_ALPHA);
            if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: "alpha",
                    reason: format!("must lie strictly between 0 and 1, got {alpha}"),
                });
            }
            Some(alpha)
        } else {
            if let Some(alpha) = self.alpha {
                log::warn!("alpha={alpha} is ignored because confidence thresholding is disabled");
            }
            None
        };

        let threads = match self.threads {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "threads",
                    reason: "must be at least 1".to_string(),
                });
            }
            Some(n) => n,
            None => num_cpus::get().max(1),
        };

        let out_base = self.out_base.ok_or(ConfigError::MissingField("out_base"))?;
        if out_base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "out_base",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(RunConfig {
            subject_list: self
                .subject_list
                .ok_or(ConfigError::MissingField("subject_list"))?,
            data_dir: self.data_dir.ok_or(ConfigError::MissingField("data_dir"))?,
            group_components: self
                .group_components
                .ok_or(ConfigError::MissingField("group_components"))?,
            extension: self.extension.ok_or(ConfigError::MissingField("extension"))?,
            out_dir: self.out_dir.ok_or(ConfigError::MissingField("out_dir"))?,
            out_base,
            hemisphere: self.hemisphere.unwrap_or_default(),
            alpha,
            threads,
        })
    }
}

/// Fully resolved settings for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub subject_list: PathBuf,
    pub data_dir: PathBuf,
    pub group_components: PathBuf,
    pub extension: String,
    pub out_dir: PathBuf,
    pub out_base: String,
    pub hemisphere: Hemisphere,
    /// Significance level for thresholding, `None` for raw betas.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alpha: Option<f64>,
    pub threads: usize,
}

impl RunConfig {
    /// Input time series for `subject`: `<data_dir>/<subject><extension>`.
    pub fn subject_input_path(&self, subject: &str) -> PathBuf {
        self.data_dir.join(format!("{subject}{}", self.extension))
    }

    /// Shared prefix of a subject's outputs: `<out_dir>/<subject>.<hemi>.<out_base>`.
    pub fn subject_output_stem(&self, subject: &str) -> String {
        format!("{subject}.{}.{}", self.hemisphere.label(), self.out_base)
    }

    pub fn spatial_output_path(&self, subject: &str) -> PathBuf {
        self.out_dir.join(format!("{}.Spatial.tsv", self.subject_output_stem(subject)))
    }

    pub fn spatial_metadata_path(&self, subject: &str) -> PathBuf {
        self.out_dir.join(format!("{}.Spatial.toml", self.subject_output_stem(subject)))
    }

    pub fn time_series_output_path(&self, subject: &str) -> PathBuf {
        self.out_dir.join(format!("{}.Time.tsv", self.subject_output_stem(subject)))
    }

    /// Run manifest: `<out_dir>/<out_base>.<hemi>.run.toml`.
    pub fn manifest_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.{}.run.toml", self.out_base, self.hemisphere.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RunConfigFile {
        RunConfigFile {
            subject_list: Some(PathBuf::from("subjects.txt")),
            data_dir: Some(PathBuf::from("/data/rest")),
            group_components: Some(PathBuf::from("group.tsv")),
            extension: Some(".rest.tsv".to_string()),
            out_dir: Some(PathBuf::from("/out")),
            out_base: Some("dual".to_string()),
            ..RunConfigFile::default()
        }
    }

    #[test]
    fn defaults_disable_thresholding_and_use_left_hemisphere() {
        let config = complete().resolve().unwrap();
        assert_eq!(config.alpha, None);
        assert_eq!(config.hemisphere, Hemisphere::L);
        assert!(config.threads >= 1);
    }

    #[test]
    fn confidence_without_alpha_uses_default() {
        let mut file = complete();
        file.confidence = Some(true);
        assert_eq!(file.resolve().unwrap().alpha, Some(DEFAULT_ALPHA));
    }

    #[test]
    fn overlay_prefers_overrides() {
        let base = RunConfigFile::from_toml_str(
            r#"
            subject_list = "from_file.txt"
            out_base = "file_base"
            hemisphere = "R"
            alpha = 0.01
            "#,
        )
        .unwrap();
        let cli = RunConfigFile {
            out_base: Some("cli_base".to_string()),
            ..RunConfigFile::default()
        };
        let merged = base.overlay(cli);
        assert_eq!(merged.out_base.as_deref(), Some("cli_base"));
        assert_eq!(merged.subject_list, Some(PathBuf::from("from_file.txt")));
        assert_eq!(merged.hemisphere, Some(Hemisphere::R));
        assert_eq!(merged.alpha, Some(0.01));
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let mut file = complete();
        file.group_components = None;
        match file.resolve() {
            Err(ConfigError::MissingField(name)) => assert_eq!(name, "group_components"),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_alpha_and_zero_threads() {
        let mut file = complete();
        file.confidence = Some(true);
        file.alpha = Some(1.5);
        assert!(matches!(
            file.resolve(),
            Err(ConfigError::InvalidValue { field: "alpha", .. })
        ));

        let mut file = complete();
        file.threads = Some(0);
        assert!(matches!(
            file.resolve(),
            Err(ConfigError::InvalidValue { field: "threads", .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RunConfigFile::from_toml_str("subjects = \"x\"").is_err());
    }

    #[test]
    fn output_paths_follow_naming_scheme() {
        let mut file = complete();
        file.hemisphere = Some(Hemisphere::R);
        let config = file.resolve().unwrap();
        assert_eq!(
            config.subject_input_path("sub01"),
            PathBuf::from("/data/rest/sub01.rest.tsv")
        );
        assert_eq!(
            config.spatial_output_path("sub01"),
            PathBuf::from("/out/sub01.R.dual.Spatial.tsv")
        );
        assert_eq!(
            config.time_series_output_path("sub01"),
            PathBuf::from("/out/sub01.R.dual.Time.tsv")
        );
        assert_eq!(config.manifest_path(), PathBuf::from("/out/dual.R.run.toml"));
        assert_eq!(Hemisphere::R.structure(), "CortexRight");
    }
}
