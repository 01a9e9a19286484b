//! # nma-sim: Network Meta-Analysis Simulation
//!
//! Simulates individual-participant data for a network of trials built from
//! treatment components, then checks how well per-study regression followed
//! by a random-effects meta-regression recovers the known component effects.
//!
//! ## Stages
//!
//! 1. **Registry**: component alphabet with true effect sizes
//! 2. **Enumeration**: every treatment arm up to a maximum size, paired with
//!    every control arm
//! 3. **Population**: studies drawn over comparisons, participants with
//!    `outcome ~ Normal(effect * treated, 1)`
//! 4. **Analysis**: study sampling, heavy-tailed truncation, per-study OLS,
//!    meta-regression, rank distributions
//!
//! All tables are handed between stages as Arrow `RecordBatch`es.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nma_sim::{Simulation, SimulationConfig};
//!
//! let config = SimulationConfig::builder()
//!     .components(&['A', 'B', 'C', 'D', 'Z'], &[0.5, 0.25])
//!     .sampled_studies(50)
//!     .seed(42)
//!     .build()?;
//!
//! let outcome = Simulation::new(config)?.run()?;
//! for r in outcome.report.recovery() {
//!     println!("{}: true {:.2} estimated {:.2}", r.component, r.true_effect, r.estimate);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod arm;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod pipeline;
pub mod population;
pub mod registry;
pub mod report;
pub mod sampling;
pub mod stats;
pub mod storage;
pub mod topk;

pub use arm::{Arm, Membership};
pub use config::{SimulationConfig, SimulationConfigBuilder, TruncationConfig};
pub use enumerate::{Comparison, ComparisonTable};
pub use error::{Error, Result};
pub use pipeline::{Analysis, PowerSummary, Replicate, RunFailure, Simulation, SimulationOutcome};
pub use population::{Population, Study, StudyTable};
pub use registry::{Component, ComponentId, ComponentRegistry};
pub use report::{RunStatus, SimulationReport};
pub use sampling::SampledSubset;
