pub use fieldline_building_blocks::*;
pub use fieldline_concepts::*;

pub use fieldline_core::config::*;
pub use fieldline_core::domain_crossing::*;
pub use fieldline_core::driver::*;
pub use fieldline_core::runner::*;
pub use fieldline_core::solvers::*;
pub use fieldline_core::storage::*;
pub use fieldline_core::transport::*;
pub use fieldline_core::wire::*;
pub use fieldline_core::*;
