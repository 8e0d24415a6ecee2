mod envelope_repository;
mod histogram_query;

pub use envelope_repository::*;
pub use histogram_query::*;
