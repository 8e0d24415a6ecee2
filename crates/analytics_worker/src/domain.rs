mod processed_envelope_service;

pub use processed_envelope_service::*;
