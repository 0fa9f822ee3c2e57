use std::collections::HashSet;

use super::commands::{BreakpointAction, Command, CommandError, CommandResult, SetTarget};
use crate::emu::{Machine, MachineError, Opcode, Runner, RunnerResult};

/// Executes debugger commands against a [`Runner`] and tracks run state
/// and breakpoints.
pub struct Executor {
    is_running: bool,
    runner: Runner,
    breakpoints: HashSet<u16>,
}

impl Executor {
    pub fn new(runner: Runner) -> Self {
        Self {
            is_running: false,
            runner,
            breakpoints: HashSet::new(),
        }
    }

    /// Advances the emulation while the debugger is in running mode.
    /// Drops back to paused on a breakpoint or a machine fault.
    pub fn poll(&mut self, dt: f32) -> Result<RunnerResult, MachineError> {
        if !self.is_running {
            return Ok(RunnerResult::Ok);
        }

        let result = self
            .runner
            .update_with_breakpoints(dt, Some(&self.breakpoints));

        if matches!(result, Err(_) | Ok(RunnerResult::HitBreakpoint)) {
            self.is_running = false;
        }

        result
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandResult, CommandError> {
        match command {
            Command::Run => {
                self.is_running = true;
                Ok(CommandResult::Ok)
            }
            Command::Pause => {
                self.pause();
                Ok(CommandResult::Ok)
            }
            Command::Step => self.execute_step(),
            Command::Breakpoint { action } => self.handle_breakpoint(action),
            Command::Set { target, value } => self.handle_set(target, value),
            Command::Mem { start, len } => Ok(self.handle_mem(start, len)),
            Command::Disasm { start, count } => Ok(self.handle_disasm(start, count)),
            Command::Quit => Ok(CommandResult::Quit),
        }
    }

    pub fn pause(&mut self) {
        self.is_running = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn machine(&self) -> &Machine {
        self.runner.machine()
    }

    pub fn runner_mut(&mut self) -> &mut Runner {
        &mut self.runner
    }

    fn execute_step(&mut self) -> Result<CommandResult, CommandError> {
        let machine = self.runner.machine_mut();
        machine.step();

        if let Some(fault) = machine.last_error() {
            return Err(fault.clone().into());
        }
        Ok(CommandResult::Ok)
    }

    fn handle_breakpoint(
        &mut self,
        action: BreakpointAction,
    ) -> Result<CommandResult, CommandError> {
        match action {
            BreakpointAction::Set { addr } => {
                self.breakpoints.insert(addr);
            }
            BreakpointAction::Clear { addr } => {
                self.breakpoints.remove(&addr);
            }
            BreakpointAction::ClearAll => {
                self.breakpoints.clear();
            }
            BreakpointAction::List => {
                let mut breakpoints: Vec<u16> = self.breakpoints.iter().cloned().collect();
                breakpoints.sort();
                return Ok(CommandResult::Breakpoints(breakpoints));
            }
        };

        Ok(CommandResult::Ok)
    }

    fn handle_set(&mut self, target: SetTarget, value: u16) -> Result<CommandResult, CommandError> {
        let machine = self.runner.machine_mut();

        match target {
            SetTarget::V(reg) => {
                if value > 0xFF {
                    return Err(CommandError::ValueOutOfRange);
                }
                machine.set_register(reg, value as u8);
            }
            SetTarget::Hp48(flag) => {
                if value > 0xFF {
                    return Err(CommandError::ValueOutOfRange);
                }
                machine.set_hp48_flag(flag, value as u8);
            }
            SetTarget::I => {
                machine.set_index(value);
            }
            SetTarget::Pc => {
                machine.set_pc(value);
            }
        }

        Ok(CommandResult::Ok)
    }

    fn handle_mem(&self, start: u16, len: u16) -> CommandResult {
        let memory = self.machine().memory();
        let start_idx = (start as usize).min(memory.len());
        let end_idx = (start_idx + len as usize).min(memory.len());

        CommandResult::MemDump {
            data: memory[start_idx..end_idx].to_vec(),
            offset: start_idx as u16,
        }
    }

    fn handle_disasm(&self, start: u16, count: u16) -> CommandResult {
        let memory = self.machine().memory();

        let instructions = (0..count)
            .map_while(|idx| {
                let addr = start as usize + idx as usize * 2;
                let high = *memory.get(addr)?;
                let low = *memory.get(addr + 1)?;

                let word = u16::from_be_bytes([high, low]);
                Some((word, Opcode::decode(word)))
            })
            .collect();

        CommandResult::Disasm {
            instructions,
            offset: start,
        }
    }
}
