use std::collections::HashSet;

use super::{Machine, MachineError};

pub const CPU_HZ: f32 = 700.0;
pub const TIMER_HZ: f32 = 60.0;

const CPU_TIME_STEP: f32 = 1.0 / CPU_HZ;
const TIMER_TIME_STEP: f32 = 1.0 / TIMER_HZ;

/// Frame-time-driven scheduler around a [`Machine`].
///
/// The machine itself has no notion of time; the runner accumulates elapsed
/// seconds and dispatches timer ticks at 60Hz and CPU steps at 700Hz. It is
/// the single owner of the machine, so stepping, timer ticks and key updates
/// are confined to whichever thread drives it.
pub struct Runner {
    machine: Machine,
    cpu_dt_accumulator: f32,
    timer_dt_accumulator: f32,
}

#[derive(Debug)]
pub enum RunnerResult {
    Ok,
    HitBreakpoint,
}

impl Runner {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            cpu_dt_accumulator: 0.0,
            timer_dt_accumulator: 0.0,
        }
    }

    /// Advances the emulation by `dt` seconds of wall time.
    ///
    /// Runs as many timer ticks and CPU steps as the elapsed time calls for.
    /// Stops stepping early once an instruction touched the framebuffer, so
    /// the frontend gets a frame out before execution continues. A halted
    /// machine surfaces its recorded fault as the error.
    pub fn update(&mut self, dt: f32) -> Result<RunnerResult, MachineError> {
        self.update_with_breakpoints(dt, None)
    }

    /// Like [`Runner::update`] but pauses when the program counter lands on
    /// a breakpoint.
    pub fn update_with_breakpoints(
        &mut self,
        dt: f32,
        breakpoints: Option<&HashSet<u16>>,
    ) -> Result<RunnerResult, MachineError> {
        self.cpu_dt_accumulator += dt;
        self.timer_dt_accumulator += dt;

        while self.timer_dt_accumulator >= TIMER_TIME_STEP {
            self.timer_dt_accumulator -= TIMER_TIME_STEP;
            self.machine.tick_timers();
        }

        while self.cpu_dt_accumulator >= CPU_TIME_STEP {
            self.cpu_dt_accumulator -= CPU_TIME_STEP;

            self.machine.step();

            if let Some(fault) = self.machine.last_error() {
                self.cpu_dt_accumulator = 0.0;
                return Err(fault.clone());
            }

            if let Some(breakpoints) = breakpoints
                && breakpoints.contains(&self.machine.pc())
            {
                self.cpu_dt_accumulator = 0.0;
                return Ok(RunnerResult::HitBreakpoint);
            }

            // The screen changed; stop and let the frontend render before
            // executing further. The accumulator is cleared to avoid
            // "catching up" too fast in the next frame.
            if self.machine.consume_dirty_flag(false) {
                self.cpu_dt_accumulator = 0.0;
                break;
            }
        }

        Ok(RunnerResult::Ok)
    }

    /// Returns true if the sound timer is active, indicating a beep should be played.
    pub fn should_beep(&self) -> bool {
        self.machine.should_beep()
    }

    /// Forwards a key state change to the machine's keypad.
    pub fn set_key(&mut self, key: u8, pressed: bool) {
        self.machine.set_key(key, pressed)
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }
}
