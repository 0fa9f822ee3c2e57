/// Decoded CHIP-8/SCHIP instruction.
///
/// Operand fields come masked to their documented ranges: `x`/`y` index the
/// 16 registers, `n` is a nibble, `nn` a byte and `nnn` a 12-bit address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Jump { nnn: u16 },
    JumpWithOffset { nnn: u16 },

    Call { nnn: u16 },
    Return,

    SkipRegEqualImm { x: usize, nn: u8 },
    SkipRegNotEqualImm { x: usize, nn: u8 },
    SkipRegEqualReg { x: usize, y: usize },
    SkipRegNotEqualReg { x: usize, y: usize },

    SetRegImm { x: usize, nn: u8 },
    AddRegImm { x: usize, nn: u8 },
    SetIndexImm { nnn: u16 },
    AddIndexReg { x: usize },

    Alu { x: usize, y: usize, op: AluOp },
    Random { x: usize, nn: u8 },

    ClearDisplay,
    Draw { x: usize, y: usize, n: usize },
    ScrollDown { n: usize },
    ScrollRight,
    ScrollLeft,
    LowRes,
    HighRes,
    Quit,

    SkipIfPressed { x: usize },
    SkipIfNotPressed { x: usize },
    WaitForKey { x: usize },

    ReadDelayTimer { x: usize },
    SetDelayTimer { x: usize },
    SetSoundTimer { x: usize },

    FontChar { x: usize },
    Bcd { x: usize },

    StoreRegs { x: usize },
    LoadRegs { x: usize },
    StoreFlags { x: usize },
    LoadFlags { x: usize },

    Unknown(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Assign,
    Or,
    And,
    Xor,
    Add,
    Sub,
    ShiftRight,
    SubReverse,
    ShiftLeft,
}

impl Opcode {
    /// Decode a raw 16-bit instruction word.
    ///
    /// More specific patterns are matched before the per-family fallthroughs,
    /// so anything not in the instruction set ends up as `Unknown`.
    pub fn decode(opcode: u16) -> Self {
        let nibble = (
            ((opcode & 0xF000) >> 12) as u8,
            ((opcode & 0x0F00) >> 8) as u8,
            ((opcode & 0x00F0) >> 4) as u8,
            (opcode & 0x000F) as u8,
        );

        let x = nibble.1 as usize;
        let y = nibble.2 as usize;
        let n = nibble.3 as usize;
        let nn = (opcode & 0x00FF) as u8;
        let nnn = opcode & 0x0FFF;

        match (nibble.0, nibble.1, nibble.2, nibble.3) {
            (0x0, 0x0, 0xC, _) => Opcode::ScrollDown { n },
            (0x0, 0x0, 0xE, 0x0) => Opcode::ClearDisplay,
            (0x0, 0x0, 0xE, 0xE) => Opcode::Return,
            (0x0, 0x0, 0xF, 0xB) => Opcode::ScrollRight,
            (0x0, 0x0, 0xF, 0xC) => Opcode::ScrollLeft,
            (0x0, 0x0, 0xF, 0xD) => Opcode::Quit,
            (0x0, 0x0, 0xF, 0xE) => Opcode::LowRes,
            (0x0, 0x0, 0xF, 0xF) => Opcode::HighRes,
            (0x1, _, _, _) => Opcode::Jump { nnn },
            (0x2, _, _, _) => Opcode::Call { nnn },
            (0x3, _, _, _) => Opcode::SkipRegEqualImm { x, nn },
            (0x4, _, _, _) => Opcode::SkipRegNotEqualImm { x, nn },
            (0x5, _, _, 0x0) => Opcode::SkipRegEqualReg { x, y },
            (0x6, _, _, _) => Opcode::SetRegImm { x, nn },
            (0x7, _, _, _) => Opcode::AddRegImm { x, nn },
            (0x8, _, _, _) => Opcode::Alu {
                x,
                y,
                op: match nibble.3 {
                    0x0 => AluOp::Assign,
                    0x1 => AluOp::Or,
                    0x2 => AluOp::And,
                    0x3 => AluOp::Xor,
                    0x4 => AluOp::Add,
                    0x5 => AluOp::Sub,
                    0x6 => AluOp::ShiftRight,
                    0x7 => AluOp::SubReverse,
                    0xE => AluOp::ShiftLeft,
                    _ => return Opcode::Unknown(opcode),
                },
            },
            (0x9, _, _, 0x0) => Opcode::SkipRegNotEqualReg { x, y },
            (0xA, _, _, _) => Opcode::SetIndexImm { nnn },
            (0xB, _, _, _) => Opcode::JumpWithOffset { nnn },
            (0xC, _, _, _) => Opcode::Random { x, nn },
            (0xD, _, _, _) => Opcode::Draw { x, y, n },
            (0xE, _, 0x9, 0xE) => Opcode::SkipIfPressed { x },
            (0xE, _, 0xA, 0x1) => Opcode::SkipIfNotPressed { x },
            (0xF, _, 0x0, 0x7) => Opcode::ReadDelayTimer { x },
            (0xF, _, 0x0, 0xA) => Opcode::WaitForKey { x },
            (0xF, _, 0x1, 0x5) => Opcode::SetDelayTimer { x },
            (0xF, _, 0x1, 0x8) => Opcode::SetSoundTimer { x },
            (0xF, _, 0x1, 0xE) => Opcode::AddIndexReg { x },
            (0xF, _, 0x2, 0x9) => Opcode::FontChar { x },
            (0xF, _, 0x3, 0x3) => Opcode::Bcd { x },
            (0xF, _, 0x5, 0x5) => Opcode::StoreRegs { x },
            (0xF, _, 0x6, 0x5) => Opcode::LoadRegs { x },
            (0xF, _, 0x7, 0x5) => Opcode::StoreFlags { x },
            (0xF, _, 0x8, 0x5) => Opcode::LoadFlags { x },

            _ => Opcode::Unknown(opcode),
        }
    }
}
