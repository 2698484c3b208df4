mod analytic;
mod restricted;
mod second_order;

pub use analytic::*;
pub use restricted::*;
pub use second_order::*;
