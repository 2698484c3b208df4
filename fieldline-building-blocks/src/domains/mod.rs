mod cartesian;

pub use cartesian::*;
