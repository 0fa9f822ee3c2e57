pub mod debugger;
pub mod emu;
