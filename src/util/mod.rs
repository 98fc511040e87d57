//! Small helpers shared by pool users

pub mod counter;

pub use counter::LongCounter;
