#![deny(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate advects integral curves through vector fields whose data is distributed over
//! many [domains](fieldline_concepts::DomainOwnership).
//!
//! ## Integration
//! Each [Curve] carries its own [Stepper](solvers::Stepper) which advances it one step at a
//! time and produces contiguous [StepRecord]s.
//! The step-size policy and the built-in integrators live in [solvers], together with the
//! [StepperRegistry](solvers::StepperRegistry) which reconstructs them on other processes.
//!
//! ## Decomposed domains
//! The [DomainCrossingCoordinator](domain_crossing::DomainCrossingCoordinator) checks after
//! every step if a curve is still owned by the local domain and hands it to the owner of its
//! new position otherwise.
//! Curves travel as plain bytes which are produced by the [wire] module and delivered by a
//! [Communicator](transport::Communicator).
//! The [AdvectionDriver](driver::AdvectionDriver) advances all curves of one domain in
//! parallel while [run_decomposed](runner::run_decomposed) spawns one driver per domain.
//!
//! ## Storage
//! Curves can be written to and loaded from binary batch files in the same format which is
//! used for transmission. Summaries can be exported as json. See [storage].

pub mod config;
pub mod domain_crossing;
pub mod driver;
pub mod runner;
pub mod solvers;
pub mod storage;
pub mod transport;
pub mod wire;

mod curve;
mod errors;
mod step_record;

pub use curve::*;
pub use errors::*;
pub use step_record::*;

#[doc(hidden)]
pub use rayon;

#[cfg(feature = "tracing")]
#[doc(hidden)]
pub use tracing;

/// Installs a global [tracing_subscriber] which prints events up to the given level.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing")))]
pub fn init_tracing(level: tracing::Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
