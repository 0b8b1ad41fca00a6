//! Application layer: table building, pagination, the serial mutation queue,
//! the coalescing validation scheduler, and the table service tying them
//! together.

pub mod builder;
pub mod error;
pub mod paginate;
pub mod queue;
pub mod scheduler;
pub mod tables;
