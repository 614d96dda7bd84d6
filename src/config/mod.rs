use anyhow::{Context, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

use overpass_ql::Dialect;

pub const DEFAULT_SRID: u32 = 4326;

/// Settings as written in a YAML file or given on the command line; every
/// field is optional.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub dialect: Option<String>,
    pub srid: Option<u32>,
    pub key_wrap: Option<String>,
    pub anchor_regexes: Option<bool>,
    pub format: Option<OutputFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Values set in `other` win.
    pub fn merge(self, other: FileConfig) -> FileConfig {
        FileConfig {
            dialect: other.dialect.or(self.dialect),
            srid: other.srid.or(self.srid),
            key_wrap: other.key_wrap.or(self.key_wrap),
            anchor_regexes: other.anchor_regexes.or(self.anchor_regexes),
            format: other.format.or(self.format),
        }
    }
}

/// Fully resolved conversion settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertConfig {
    pub dialect: Dialect,
    pub srid: u32,
    /// Marker placed on both sides of every tag key in emitted SQL.
    pub key_wrap: Option<String>,
    /// Lower regex filters as whole-value matches.
    pub anchor_regexes: bool,
    pub format: OutputFormat,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            srid: DEFAULT_SRID,
            key_wrap: None,
            anchor_regexes: false,
            format: OutputFormat::Sql,
        }
    }
}

impl TryFrom<FileConfig> for ConvertConfig {
    type Error = anyhow::Error;

    fn try_from(file: FileConfig) -> anyhow::Result<Self> {
        let defaults = ConvertConfig::default();
        let dialect = match file.dialect {
            Some(name) => name.parse::<Dialect>().context("Config: Invalid dialect")?,
            None => defaults.dialect,
        };
        let srid = file.srid.unwrap_or(defaults.srid);
        if srid == 0 {
            bail!("Config: srid must be a positive integer");
        }
        Ok(Self {
            dialect,
            srid,
            key_wrap: file.key_wrap.filter(|wrap| !wrap.is_empty()),
            anchor_regexes: file.anchor_regexes.unwrap_or(defaults.anchor_regexes),
            format: file.format.unwrap_or(defaults.format),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Whole-query SQL
    Sql,
    /// Canonical Overpass QL
    Overpass,
    /// One selector set per element query
    Selectors,
    /// The parsed tree as JSON
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn yaml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = yaml(
            "dialect: duckdb\nsrid: 3857\nkey_wrap: _\nanchor_regexes: true\nformat: selectors\n",
        );
        let loaded = FileConfig::load(file.path()).unwrap();
        assert_eq!(
            loaded,
            FileConfig {
                dialect: Some("duckdb".into()),
                srid: Some(3857),
                key_wrap: Some("_".into()),
                anchor_regexes: Some(true),
                format: Some(OutputFormat::Selectors),
            }
        );
        let config = ConvertConfig::try_from(loaded).unwrap();
        assert_eq!(config.dialect, Dialect::DuckDb);
        assert_eq!(config.srid, 3857);
        assert!(config.anchor_regexes);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let file = yaml("dialekt: duckdb\n");
        assert!(FileConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ConvertConfig::try_from(FileConfig::default()).unwrap();
        assert_eq!(config, ConvertConfig::default());
    }

    #[test]
    fn test_overrides_win() {
        let file = FileConfig {
            dialect: Some("duckdb".into()),
            srid: Some(3857),
            ..FileConfig::default()
        };
        let cli = FileConfig {
            dialect: Some("postgres".into()),
            ..FileConfig::default()
        };
        let merged = file.merge(cli);
        assert_eq!(merged.dialect.as_deref(), Some("postgres"));
        assert_eq!(merged.srid, Some(3857));
    }

    #[test]
    fn test_invalid_values() {
        let bad_dialect = FileConfig {
            dialect: Some("oracle".into()),
            ..FileConfig::default()
        };
        let err = ConvertConfig::try_from(bad_dialect).unwrap_err();
        assert!(format!("{:#}", err).contains("Unsupported SQL dialect: oracle"));

        let zero_srid = FileConfig {
            srid: Some(0),
            ..FileConfig::default()
        };
        assert!(ConvertConfig::try_from(zero_srid).is_err());
    }
}
