//! Domain model: items, routes, columns, rows, pages, tables, and the
//! canonical token algorithm.

pub mod error;
pub mod paths;
pub mod token;
pub mod types;
