pub mod checkpoint;
pub mod dataset;
pub mod features;
pub mod loaders;
pub mod window;

pub use checkpoint::*;
pub use dataset::*;
pub use features::*;
pub use loaders::*;
pub use window::*;

use av_types::{ModelFamily, Period};
use std::path::{Path, PathBuf};

/// Environment variable overriding the working directory.
pub const WORKING_DIR_ENV: &str = "AVM_WORKING_DIR";

/// Root under which samples are read and checkpoint logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    root: PathBuf,
}

impl WorkingDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `$AVM_WORKING_DIR`, else the platform data directory, else `./WORKING`.
    pub fn from_env() -> Self {
        if let Some(root) = std::env::var_os(WORKING_DIR_ENV).filter(|v| !v.is_empty()) {
            return Self::new(root);
        }
        let root = dirs::data_dir()
            .map(|dir| dir.join("avm-sweep"))
            .unwrap_or_else(|| PathBuf::from("WORKING"));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples_path(&self) -> PathBuf {
        self.root.join("samples-train.csv")
    }

    /// `<root>/valavm/[<features>-]<family|all>/[test-]<YYYYMM>.jsonl`
    ///
    /// The feature-set prefix is left out for [`FeatureSet::all`].
    pub fn checkpoint_path(
        &self,
        target: Period,
        features: &FeatureSet,
        family: Option<ModelFamily>,
        test: bool,
    ) -> PathBuf {
        let family = family.map_or("all", |f| f.short_tag());
        let group = if features.is_all() {
            family.to_string()
        } else {
            format!("{}-{}", features.name(), family)
        };
        let prefix = if test { "test-" } else { "" };
        self.root
            .join("valavm")
            .join(group)
            .join(format!("{}{}.jsonl", prefix, target.yyyymm()))
    }
}

impl Default for WorkingDir {
    fn default() -> Self {
        Self::from_env()
    }
}
