//! Transport-agnostic binary representation of the integration state.
//!
//! The [WireBuffer] is the only format in which curves travel between domains or are stored
//! on disk.
//! Types describe their layout by implementing [WireFormat] while objects with internal state
//! (such as [Stepper](crate::solvers::Stepper)s) expose their fields through the
//! [StateCheckpoint] visitor.

mod buffer;
mod checkpoint;
mod format;

pub use buffer::*;
pub use checkpoint::*;
pub use format::*;
