/// Video mode of the machine, selects the framebuffer resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Classic CHIP-8, 64x32 pixels
    #[default]
    Chip8,
    /// SCHIP (super chip) mode, 128x64 pixels
    Schip,
}

impl Mode {
    /// Framebuffer dimensions (width, height) for this mode.
    pub fn display_size(self) -> (usize, usize) {
        match self {
            Mode::Chip8 => (64, 32),
            Mode::Schip => (128, 64),
        }
    }
}

/// Fatal machine faults. Any of these halts the running program; the driver
/// is expected to poll [`crate::emu::Machine::last_error`] after each step and
/// stop driving the machine once one is set.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    /// A 17th return address was pushed onto the call stack
    #[error("stack overflow at PC={pc:#06x}")]
    StackOverflow { pc: u16 },
    /// Returned from a subroutine with an empty call stack
    #[error("stack underflow at PC={pc:#06x}")]
    StackUnderflow { pc: u16 },
    /// A register block copy would run past the end of memory
    #[error("memory overflow at PC={pc:#06x}")]
    MemoryOverflow { pc: u16 },
    /// An HP48 flag transfer named a flag index past the register file
    #[error("HP48 flag {flag} out of range at PC={pc:#06x}")]
    Hp48FlagOutOfRange { flag: usize, pc: u16 },
    /// Encountered an instruction that is not part of the CHIP-8/SCHIP set
    #[error("unsupported instruction {opcode:#06x} at PC={pc:#06x}")]
    UnsupportedInstruction { opcode: u16, pc: u16 },
    /// The program executed 00FD
    #[error("quit requested by program (00FD)")]
    QuitRequested,
}
