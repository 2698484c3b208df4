#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! [fieldline](crate) advects integral curves through vector fields whose data is split over
//! many domains.
//! Every domain only answers queries about its own part of space.
//! Curves which leave a domain are serialized together with the complete state of their
//! integrator and continue on the domain which owns their new position without any loss of
//! accuracy.
//!
//! ```
//! use fieldline::prelude::*;
//! use std::collections::HashMap;
//!
//! let decomposition =
//!     CartesianDecomposition::from_boundaries_and_n_domains([0.0; 2], [3.0, 1.0], [3, 1])?;
//! let fields: HashMap<_, _> = decomposition
//!     .domains()
//!     .into_iter()
//!     .map(|domain| {
//!         let field = decomposition.restrict(&domain, UniformField::new([1.0, 0.0]), 0.1)?;
//!         Ok::<_, BoundaryError>((domain, field))
//!     })
//!     .collect::<Result<_, BoundaryError>>()?;
//!
//! let settings = AdvectionSettings {
//!     stepper: StepperKind::RungeKutta4,
//!     step_size: 0.1,
//!     ..Default::default()
//! };
//! let seeds = seed_line([0.05, 0.2].into(), [0.05, 0.8].into(), 4)
//!     .into_iter()
//!     .enumerate()
//!     .map(|(n, y0)| settings.seed_curve(CurveId(n as u64), DomainId(0), 0.0, y0))
//!     .collect();
//!
//! let result = run_decomposed(decomposition, fields, seeds, 2.5, &settings)?;
//! for curve in result.curves.iter() {
//!     assert_eq!(curve.status(), CurveStatus::Terminated);
//!     assert_eq!(curve.n_handoffs(), 2);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use fieldline_building_blocks as building_blocks;

pub use fieldline_concepts as concepts;

pub use fieldline_core as core;

/// Re-exports the default types, traits and functions.
pub mod prelude;
