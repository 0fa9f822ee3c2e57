use rand::{RngCore, SeedableRng, rngs::StdRng};

use super::{FONT, FONT_BASE, Framebuffer, MachineError, Mode, Opcode};

pub(crate) const MEMORY_SIZE: usize = 4096;
pub(crate) const PROGRAM_START: usize = 0x200;

/// Largest program that fits between the load address and the end of memory.
pub const MAX_PROGRAM_SIZE: usize = MEMORY_SIZE - PROGRAM_START;

pub(crate) const STACK_SIZE: usize = 16;
pub(crate) const NUM_HP48_FLAGS: usize = 8;

/// Raw byte accesses (fetch, sprite rows, BCD) wrap into the 4KB space.
const ADDRESS_MASK: usize = MEMORY_SIZE - 1;

/// Fixed seed used on every init so runs are reproducible.
const RNG_SEED: u64 = 42;

/// CHIP-8 / SCHIP virtual machine.
///
/// Owns all interpreter state and a [`Framebuffer`] sized for the current
/// video mode. The driver repeatedly calls [`Machine::step`] and, at 60Hz,
/// [`Machine::tick_timers`]; once a fault is recorded the machine stays
/// halted and further steps do nothing.
pub struct Machine {
    /// Current video mode; switching reinitializes the framebuffer
    pub(crate) mode: Mode,
    /// 4KB memory, font glyphs at the bottom, program at 0x200
    pub(crate) memory: [u8; MEMORY_SIZE],
    pub(crate) framebuffer: Framebuffer,

    /// Program counter: address of the next instruction to execute
    pub(crate) pc: u16,
    /// Index register: 12-bit by convention, FX1E may push it past that
    pub(crate) i: u16,
    /// General-purpose registers V0-VF (VF doubles as the flag register)
    pub(crate) v: [u8; 16],
    /// Call stack, at most 16 return addresses
    pub(crate) stack: Vec<u16>,
    /// HP48 flag registers, persistent across programs (SCHIP extension)
    pub(crate) hp48: [u8; NUM_HP48_FLAGS],

    /// Delay timer: decrements at 60Hz until it reaches 0
    pub(crate) delay_timer: u8,
    /// Sound timer: decrements at 60Hz, beeps while non-zero
    pub(crate) sound_timer: u8,

    /// Keypad state, one bit per hexadecimal key
    pub(crate) keys: u16,
    /// Set whenever an instruction touched the framebuffer
    pub(crate) screen_dirty: bool,
    /// Latched fault; while set the machine is halted
    pub(crate) fault: Option<MachineError>,

    /// Random byte source for CXKK, reseeded deterministically on init
    pub(crate) rng: Box<dyn RngCore + Send>,
}

impl Machine {
    pub fn new(mode: Mode) -> Self {
        let mut machine = Machine {
            mode,
            memory: [0; MEMORY_SIZE],
            framebuffer: Framebuffer::new(mode),
            pc: PROGRAM_START as u16,
            i: 0,
            v: [0; 16],
            stack: Vec::with_capacity(STACK_SIZE),
            hp48: [0; NUM_HP48_FLAGS],
            delay_timer: 0,
            sound_timer: 0,
            keys: 0,
            screen_dirty: false,
            fault: None,
            rng: Box::new(StdRng::seed_from_u64(RNG_SEED)),
        };
        machine.init(mode);
        machine
    }

    /// Full reset: zeroes memory, registers, stack, timers and keys, reloads
    /// the font, reinitializes the framebuffer for `mode`, reseeds the random
    /// source and clears any latched fault.
    pub fn init(&mut self, mode: Mode) {
        self.mode = mode;
        self.framebuffer.init(mode);

        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_BASE..FONT_BASE + FONT.len()].copy_from_slice(&FONT);

        self.pc = PROGRAM_START as u16;
        self.i = 0;
        self.v = [0; 16];
        self.stack.clear();
        self.hp48 = [0; NUM_HP48_FLAGS];
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.keys = 0;
        self.screen_dirty = false;
        self.fault = None;
        self.rng = Box::new(StdRng::seed_from_u64(RNG_SEED));
    }

    /// Copies a program into memory starting at 0x200.
    ///
    /// Oversized programs are ignored without a partial copy; callers are
    /// expected to check sizes themselves.
    pub fn load_program(&mut self, program: &[u8]) {
        if program.len() > MEMORY_SIZE - PROGRAM_START {
            return;
        }
        self.memory[PROGRAM_START..PROGRAM_START + program.len()].copy_from_slice(program);
    }

    /// Executes one fetch-decode-execute cycle.
    ///
    /// Faults are latched rather than returned; a halted machine ignores
    /// further steps. Drivers poll [`Machine::last_error`] after each step.
    pub fn step(&mut self) {
        if self.fault.is_some() {
            return;
        }

        let opcode = Opcode::decode(self.fetch());
        if let Err(fault) = self.execute(opcode) {
            self.fault = Some(fault);
        }
    }

    /// Decrements the delay and sound timers. Invoked at 60Hz by the driver,
    /// never from instruction execution.
    pub fn tick_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Returns true while the sound timer is running.
    pub fn should_beep(&self) -> bool {
        self.sound_timer > 0
    }

    /// Set the state of one key (0x0-0xF) on the keypad.
    pub fn set_key(&mut self, key: u8, pressed: bool) {
        let bit = 1 << (key & 0x0F);
        if pressed {
            self.keys |= bit;
        } else {
            self.keys &= !bit;
        }
    }

    pub fn is_key_pressed(&self, key: u8) -> bool {
        self.keys & (1 << (key & 0x0F)) != 0
    }

    /// Reports whether the framebuffer changed since the flag was last
    /// cleared, optionally clearing it for the next frame.
    pub fn consume_dirty_flag(&mut self, reset: bool) -> bool {
        let dirty = self.screen_dirty;
        if reset {
            self.screen_dirty = false;
        }
        dirty
    }

    /// Read access to the framebuffer for renderers.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_halted(&self) -> bool {
        self.fault.is_some()
    }

    /// The fault that halted the machine, if any.
    pub fn last_error(&self) -> Option<&MachineError> {
        self.fault.as_ref()
    }

    /// Replaces the random byte source, mainly for deterministic tests.
    pub fn set_rng(&mut self, rng: Box<dyn RngCore + Send>) {
        self.rng = rng;
    }

    // Inspection surface used by the debugger front end.

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn index(&self) -> u16 {
        self.i
    }

    pub fn registers(&self) -> &[u8; 16] {
        &self.v
    }

    pub fn hp48_flags(&self) -> &[u8; NUM_HP48_FLAGS] {
        &self.hp48
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn set_index(&mut self, i: u16) {
        self.i = i;
    }

    pub fn set_register(&mut self, reg: usize, value: u8) {
        self.v[reg & 0x0F] = value;
    }

    pub fn set_hp48_flag(&mut self, flag: usize, value: u8) {
        if flag < NUM_HP48_FLAGS {
            self.hp48[flag] = value;
        }
    }

    /// Fetches the big-endian instruction word at the program counter.
    pub(crate) fn fetch(&self) -> u16 {
        let high = self.mem_read(self.pc);
        let low = self.mem_read(self.pc.wrapping_add(1));
        u16::from_be_bytes([high, low])
    }

    pub(crate) fn mem_read(&self, addr: u16) -> u8 {
        self.memory[addr as usize & ADDRESS_MASK]
    }

    pub(crate) fn mem_write(&mut self, addr: u16, value: u8) {
        self.memory[addr as usize & ADDRESS_MASK] = value;
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(Mode::Chip8)
    }
}
