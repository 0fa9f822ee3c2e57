mod commands;
mod executor;

pub use commands::*;
pub use executor::*;
