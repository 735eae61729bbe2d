//! # av-optimizer
//!
//! Hyperparameter axes and the configuration space generator.
//!
//! [`SearchAxes`] lists the allowed values of every hyperparameter;
//! [`ConfigurationSpace`] expands them into the tagged [`ModelConfig`]
//! grid for the families named by a [`FamilySelection`].
//!
//! [`ModelConfig`]: av_types::ModelConfig

mod search;
mod space;

pub use search::{BoostingAxes, LinearAxes, SearchAxes, TreeAxes};
pub use space::{ConfigurationSpace, FamilySelection};
