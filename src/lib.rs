//! # doe-navigator: Active-Learning Cycles for Design-of-Experiments Campaigns
//!
//! A campaign explores a fixed grid of experimental conditions (the pool).
//! Every cycle picks a batch of points for the lab, the lab validates them,
//! and the results are folded back in before the next cycle trains a
//! classifier and picks again.
//!
//! ## Cycle Flow
//!
//! - **Cycle 0**: model-free diversity sampling (farthest-point or random)
//! - **Cycle n > 0**: merge validated labels, fit a probabilistic classifier,
//!   score the whole pool and take the most uncertain unknown points
//! - **Every cycle**: barcode the batch, write the artifacts, register the
//!   batch in the versioned master ledger
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use doe_navigator::config::{CampaignPaths, CycleConfig};
//! use doe_navigator::cycle::CycleController;
//!
//! let config = CycleConfig::from_path("cycle_1.yaml")?;
//! let paths = CampaignPaths::new("experiments/robot001", "master");
//! let outcome = CycleController::new(config, paths)?.run()?;
//! println!("selected {:?}", outcome.selection.acquisition.indices);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod acquisition;
pub mod campaign;
pub mod classifier;
pub mod config;
pub mod convergence;
pub mod cycle;
pub mod design;
pub mod error;
pub mod features;
pub mod identifier;
pub mod ledger;
pub mod search_space;
pub mod storage;

pub use acquisition::{AcquisitionResult, DecisionFunction, DiversitySampler, UncertaintySampler};
pub use classifier::{Classifier, ClassifierSpec, KernelExpr};
pub use config::{CampaignPaths, CycleConfig};
pub use cycle::{CycleController, CycleRecord, CycleState};
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerStore};
pub use search_space::{Label, LabelSchema, SearchSpace};
