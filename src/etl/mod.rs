//! Booking ETL pipeline - transform raw listing batches, stage them,
//! and merge the star schema

pub mod load;
pub mod parse;
pub mod stage;
pub mod transform;
pub mod types;
pub mod utils;

pub use types::*;
