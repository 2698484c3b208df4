//! Re-exports of all fields, domains and seeding helpers.
pub use crate::domains::*;
pub use crate::fields::*;
pub use crate::seeds::*;
