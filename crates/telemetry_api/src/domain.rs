mod data_envelope_service;
mod end_device_data_service;

pub use data_envelope_service::*;
pub use end_device_data_service::*;
