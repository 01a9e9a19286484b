//! Analysis stages
//!
//! - [`ols`]: per-study `outcome ~ treated` regression
//! - [`meta`]: random-effects meta-regression on component contrasts
//! - [`ranking`]: rank distributions of treatment arms

pub mod meta;
pub mod ols;
pub mod ranking;

pub use meta::{ComponentEstimate, ComponentRecovery, MetaRegression};
pub use ols::{StudyEstimate, StudyEstimates};
pub use ranking::{RankDistribution, RankSummary};
