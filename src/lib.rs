//! Batch fraud analytics: grouped fraud statistics and three fraud
//! classifiers over the cleaned transaction relation, exported as CSV.

pub mod aggregate;
pub mod config;
pub mod csv_reader;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod features;
pub mod frame;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod source;
pub mod store;
pub mod training;
//test module
#[cfg(test)]
mod tests;
