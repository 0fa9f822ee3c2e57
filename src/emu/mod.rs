mod execute;
mod font;
mod framebuffer;
mod machine;
mod opcode;
mod runner;
mod types;

pub use font::*;
pub use framebuffer::*;
pub use machine::*;
pub use opcode::*;
pub use runner::*;
pub use types::*;
