mod processed_envelope_processor;
mod processed_envelope_producer;

pub use processed_envelope_processor::*;
pub use processed_envelope_producer::*;
