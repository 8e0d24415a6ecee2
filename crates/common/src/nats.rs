mod client;
mod consumer;
mod trace_context;
mod traits;

pub use client::*;
pub use consumer::*;
pub use trace_context::*;
pub use traits::*;
