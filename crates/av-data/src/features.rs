use std::fmt;
use std::str::FromStr;

use av_types::{validation_error, AvError, AvResult};

use crate::loaders::CsvLoader;

/// A named choice of feature columns.
///
/// Sweeps over different feature sets write to different checkpoint logs, so
/// the name ends up in a directory name and is restricted to path-safe
/// characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    name: String,
    columns: Option<Vec<String>>,
}

impl FeatureSet {
    /// Every numeric column the loader finds.
    pub fn all() -> Self {
        Self {
            name: "all".to_string(),
            columns: None,
        }
    }

    pub fn named(name: impl Into<String>, columns: Vec<String>) -> AvResult<Self> {
        let name = name.into();
        check_name(&name)?;
        if columns.is_empty() {
            return Err(validation_error!("Feature set {} has no columns", name));
        }
        for (i, column) in columns.iter().enumerate() {
            if column.is_empty() {
                return Err(validation_error!("Feature set {} has an empty column name", name));
            }
            if columns[..i].iter().any(|c| c.eq_ignore_ascii_case(column)) {
                return Err(validation_error!("Feature set {} repeats column {}", name, column));
            }
        }
        Ok(Self {
            name,
            columns: Some(columns),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn is_all(&self) -> bool {
        self.columns.is_none()
    }

    /// Restrict `loader` to this set's columns.
    pub fn apply(&self, loader: CsvLoader) -> CsvLoader {
        match &self.columns {
            Some(columns) => loader.with_feature_columns(columns.clone()),
            None => loader,
        }
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.columns {
            Some(columns) => write!(f, "{}={}", self.name, columns.join(",")),
            None => write!(f, "{}", self.name),
        }
    }
}

/// `all`, `NAME=col,col,...` or a bare `col,col,...` named after its columns.
impl FromStr for FeatureSet {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let (name, list) = match s.split_once('=') {
            Some((name, list)) => (Some(name.trim()), list),
            None => (None, s),
        };
        let columns: Vec<String> = list.split(',').map(|c| c.trim().to_string()).collect();
        let name = name.map_or_else(|| columns.join("+"), str::to_string);
        Self::named(name, columns)
    }
}

fn check_name(name: &str) -> AvResult<()> {
    let safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.');
    if name.is_empty() || name.starts_with('.') || !name.chars().all(safe) {
        return Err(validation_error!("Invalid feature set name: '{}'", name));
    }
    if name.eq_ignore_ascii_case("all") {
        return Err(validation_error!("Feature set name 'all' is reserved"));
    }
    Ok(())
}
