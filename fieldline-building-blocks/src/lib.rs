#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
//! # fieldline - Building Blocks
//!
//! Ready-made pieces to set up advection runs without writing a mesh backend.
//! [fields] contains analytic vector fields which implement
//! [FieldSampler](fieldline_concepts::FieldSampler) together with
//! [SubDomainField] which restricts any of them to the data of a single subdomain.
//! [domains] provides a regular [CartesianDecomposition] of a box into subdomains and
//! [seeds] places initial points for curves.
//!
//! ```
//! # use fieldline_building_blocks::prelude::*;
//! # use fieldline_concepts::{DomainId, DomainOwnership, FieldSampler};
//! let decomposition = CartesianDecomposition::from_boundaries_and_n_domains(
//!     [0.0; 2],
//!     [2.0, 1.0],
//!     [2, 1],
//! )
//! .unwrap();
//! let local = decomposition
//!     .restrict(&DomainId(1), UniformField::new([1.0, 0.0]), 0.0)
//!     .unwrap();
//! for seed in seed_line([1.25, 0.5].into(), [1.75, 0.5].into(), 3) {
//!     assert_eq!(decomposition.owner_of(&seed), Some(DomainId(1)));
//!     assert!(local.evaluate(0.0, &seed).is_ok());
//! }
//! ```

/// Decompositions of space into subdomains
pub mod domains;

/// Analytic vector fields
pub mod fields;

/// Initial points of curves
pub mod seeds;

/// Handy re-exports of every building block.
pub mod prelude;

pub use crate::domains::*;
pub use crate::fields::*;
pub use crate::seeds::*;
