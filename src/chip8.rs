use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{info, trace, warn};

use crate::display::Display;
use crate::error::Chip8Error;
use crate::instruction::{DecodedInstruction, lookup};
use crate::state::{Chip8State, Keypad, MAX_ROM_SIZE, MEM_SIZE};

#[derive(Debug)]
pub enum RunState {
    Running,
    /// A fatal error stopped the program. Only a reset or a new ROM resumes.
    Halted(Chip8Error),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }
}

/// Fetch-decode-execute driver. Owns the machine for the lifetime of a
/// loaded program; the host supplies input, timer ticks and rendering.
pub struct Chip8 {
    state: Chip8State,
    run_state: RunState,
}

impl Chip8 {
    pub fn new() -> Self {
        Self::from_state(Chip8State::new())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_state(Chip8State::with_seed(seed))
    }

    fn from_state(state: Chip8State) -> Self {
        Chip8 {
            state,
            run_state: RunState::Running,
        }
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.run_state = RunState::Running;
        info!("machine reset");
    }

    /// Resets the machine and copies `rom` to the program area.
    pub fn load_rom(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: rom.len(),
                max_size: MAX_ROM_SIZE,
            });
        }
        self.reset();
        self.state.memory.load_rom(rom)?;
        info!("loaded ROM [size: {} bytes]", rom.len());
        Ok(())
    }

    /// Loads a ROM from `reader`, which claims to hold `reported_len` bytes.
    /// Fails if the claim or the stream exceeds program space, or if the
    /// reader delivers a different number of bytes than claimed.
    pub fn load_rom_from<R: Read>(
        &mut self,
        reader: R,
        reported_len: u64,
    ) -> Result<(), Chip8Error> {
        let reported_len = usize::try_from(reported_len).unwrap_or(usize::MAX);
        if reported_len > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: reported_len,
                max_size: MAX_ROM_SIZE,
            });
        }

        let mut rom = Vec::with_capacity(reported_len);
        // One byte past capacity is enough to tell an oversized stream apart.
        reader.take(MAX_ROM_SIZE as u64 + 1).read_to_end(&mut rom)?;
        if rom.len() > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: rom.len(),
                max_size: MAX_ROM_SIZE,
            });
        }
        if rom.len() < reported_len {
            return Err(Chip8Error::RomReadShort {
                read: rom.len(),
                expected: reported_len,
            });
        }
        if rom.len() > reported_len {
            return Err(Chip8Error::RomSizeMismatch {
                read: rom.len(),
                expected: reported_len,
            });
        }
        self.load_rom(&rom)
    }

    pub fn load_rom_file(&mut self, path: &Path) -> Result<(), Chip8Error> {
        let file = File::open(path)?;
        let reported_len = file.metadata()?.len();
        self.load_rom_from(file, reported_len)
    }

    /// Runs one fetch-decode-execute cycle. Any error halts the machine.
    pub fn step(&mut self) -> &RunState {
        if self.run_state.is_running() {
            if let Err(err) = self.cycle() {
                warn!("halted at pc {:#05X}: {}", self.state.pc, err);
                self.run_state = RunState::Halted(err);
            }
        }
        &self.run_state
    }

    /// Up to `instructions` cycles, stopping early if the machine halts.
    pub fn run_frame(&mut self, instructions: u64) -> &RunState {
        for _ in 0..instructions {
            if !self.step().is_running() {
                break;
            }
        }
        &self.run_state
    }

    /// One 60 Hz timer tick, independent of how many cycles ran.
    pub fn tick_timers(&mut self) {
        self.state.tick_timers();
    }

    pub fn sound_active(&self) -> bool {
        self.state.sound_timer > 0
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn state(&self) -> &Chip8State {
        &self.state
    }

    pub fn display(&self) -> &Display {
        &self.state.display
    }

    pub fn display_mut(&mut self) -> &mut Display {
        &mut self.state.display
    }

    pub fn keypad_mut(&mut self) -> &mut Keypad {
        &mut self.state.keypad
    }

    fn fetch(&mut self) -> Result<u16, Chip8Error> {
        let pc = self.state.pc;
        if usize::from(pc) + 1 >= MEM_SIZE {
            return Err(Chip8Error::ProgramCounterOutOfBounds { pc });
        }
        let bytes = self.state.memory.read_range(pc, 2)?;
        let raw = u16::from_be_bytes([bytes[0], bytes[1]]);

        self.state.pc = pc + 2;
        Ok(raw)
    }

    fn cycle(&mut self) -> Result<(), Chip8Error> {
        let pc = self.state.pc;
        let raw = self.fetch()?;
        let instruction = lookup(DecodedInstruction::new(raw))?;
        trace!("{:#05X}: {:#06X} {}", pc, raw, instruction.name());
        instruction.execute(&mut self.state)
    }
}

impl Default for Chip8 {
    fn default() -> Self {
        Self::new()
    }
}
