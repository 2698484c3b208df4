#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
//! This crate encapsulates the concepts which govern the distributed advection of integral
//! curves in [fieldline](https://docs.rs/fieldline).
//!
//! The advection engine in [fieldline-core](https://docs.rs/fieldline-core) only ever talks
//! to its collaborators through the traits defined here:
//! a [FieldSampler] which answers queries about the vector field and a [DomainOwnership]
//! structure which knows which process owns which part of space.

mod domain;
mod errors;
mod field;

pub use domain::*;
pub use errors::*;
pub use field::*;
