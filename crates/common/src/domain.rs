mod end_device;
mod envelope;
mod histogram;
mod result;

pub use end_device::*;
pub use envelope::*;
pub use histogram::*;
pub use result::*;
