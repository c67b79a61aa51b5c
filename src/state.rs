use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::display::Display;
use crate::error::Chip8Error;
use crate::stack::CallStack;

pub type Timer = u8;
pub type Address = u16;

pub const MEM_SIZE: usize = 4096;
pub const FONT_ADDR: Address = 0x50;
pub const FONT_HEIGHT: u16 = 5;
pub const PC_START_ADDR: Address = 0x200;
pub const MAX_ROM_SIZE: usize = MEM_SIZE - PC_START_ADDR as usize;
pub const NUM_REGISTERS: usize = 16;
pub const NUM_KEYS: usize = 16;

/// Hex digit glyphs 0-F, five rows each.
pub const FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// Flat 4KB address space shared by code, data, and the font.
#[derive(Clone)]
pub struct Memory {
    data: [u8; MEM_SIZE],
}

impl Memory {
    pub fn new() -> Self {
        let mut data = [0; MEM_SIZE];
        let font_start = usize::from(FONT_ADDR);
        data[font_start..font_start + FONT.len()].copy_from_slice(&FONT);

        Memory { data }
    }

    pub fn read(&self, addr: Address) -> Result<u8, Chip8Error> {
        self.data
            .get(usize::from(addr))
            .copied()
            .ok_or(Chip8Error::MemoryOutOfBounds {
                address: usize::from(addr),
            })
    }

    pub fn write(&mut self, addr: Address, value: u8) -> Result<(), Chip8Error> {
        let slot = self
            .data
            .get_mut(usize::from(addr))
            .ok_or(Chip8Error::MemoryOutOfBounds {
                address: usize::from(addr),
            })?;
        *slot = value;
        Ok(())
    }

    /// Borrows `len` bytes starting at `addr`, or fails without reading
    /// anything if the range runs past the end of memory.
    pub fn read_range(&self, addr: Address, len: usize) -> Result<&[u8], Chip8Error> {
        let range = Self::checked_range(addr, len)?;
        Ok(&self.data[range])
    }

    /// Copies `bytes` to `addr`; all or nothing.
    pub fn write_range(&mut self, addr: Address, bytes: &[u8]) -> Result<(), Chip8Error> {
        let range = Self::checked_range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load_rom(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: rom.len(),
                max_size: MAX_ROM_SIZE,
            });
        }
        self.write_range(PC_START_ADDR, rom)
    }

    fn checked_range(addr: Address, len: usize) -> Result<std::ops::Range<usize>, Chip8Error> {
        let start = usize::from(addr);
        let end = start + len;
        if end > MEM_SIZE {
            return Err(Chip8Error::MemoryOutOfBounds {
                address: start.max(MEM_SIZE),
            });
        }
        Ok(start..end)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    VA,
    VB,
    VC,
    VD,
    VE,
    VF,
}

static REGISTERS: [Register; NUM_REGISTERS] = [
    Register::V0,
    Register::V1,
    Register::V2,
    Register::V3,
    Register::V4,
    Register::V5,
    Register::V6,
    Register::V7,
    Register::V8,
    Register::V9,
    Register::VA,
    Register::VB,
    Register::VC,
    Register::VD,
    Register::VE,
    Register::VF,
];

impl Register {
    /// Maps the low nibble of `value` to a register.
    pub fn from_index(value: u8) -> Self {
        REGISTERS[usize::from(value & 0x0F)]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// V0 through `self`, inclusive.
    pub fn up_to(self) -> &'static [Register] {
        &REGISTERS[..=self.index()]
    }
}

/// V0-VF. VF is an ordinary register that several opcodes also use as
/// their carry, borrow, or collision output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    registers: [u8; NUM_REGISTERS],
}

impl RegisterBank {
    pub fn new() -> Self {
        RegisterBank {
            registers: [0; NUM_REGISTERS],
        }
    }

    pub fn read(&self, reg: Register) -> u8 {
        self.registers[reg.index()]
    }

    pub fn write(&mut self, reg: Register, value: u8) {
        self.registers[reg.index()] = value;
    }

    pub fn set_flag(&mut self, flag: bool) {
        self.write(Register::VF, u8::from(flag));
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.registers
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Key {
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
}

static KEYS: [Key; NUM_KEYS] = [
    Key::Key0,
    Key::Key1,
    Key::Key2,
    Key::Key3,
    Key::Key4,
    Key::Key5,
    Key::Key6,
    Key::Key7,
    Key::Key8,
    Key::Key9,
    Key::KeyA,
    Key::KeyB,
    Key::KeyC,
    Key::KeyD,
    Key::KeyE,
    Key::KeyF,
];

impl Key {
    /// Maps the low nibble of `value` to a key.
    pub fn from_index(value: u8) -> Key {
        KEYS[usize::from(value & 0x0F)]
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Sixteen independent key flags, written by the host's input handling.
#[derive(Debug, Clone, Default)]
pub struct Keypad {
    keys: [bool; NUM_KEYS],
}

impl Keypad {
    pub fn new() -> Self {
        Keypad {
            keys: [false; NUM_KEYS],
        }
    }

    pub fn press_key(&mut self, key: Key) {
        self.keys[usize::from(key.index())] = true;
    }

    pub fn release_key(&mut self, key: Key) {
        self.keys[usize::from(key.index())] = false;
    }

    pub fn release_all(&mut self) {
        self.keys = [false; NUM_KEYS];
    }

    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.keys[usize::from(key.index())]
    }

    /// Lowest-numbered key currently held down.
    pub fn first_pressed(&self) -> Option<Key> {
        KEYS.into_iter().find(|&key| self.is_key_pressed(key))
    }
}

/// The whole machine: registers, memory, call stack, timers, keypad and
/// frame buffer, owned together and reset together.
pub struct Chip8State {
    pub memory: Memory,
    pub registers: RegisterBank,
    pub pc: Address,
    pub index: Address,
    pub stack: CallStack,
    pub delay_timer: Timer,
    pub sound_timer: Timer,
    pub display: Display,
    pub keypad: Keypad,
    rng: StdRng,
}

impl Chip8State {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Machine whose `Cxnn` results are reproducible for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Chip8State {
            memory: Memory::new(),
            registers: RegisterBank::new(),
            pc: PC_START_ADDR,
            index: 0,
            stack: CallStack::new(),
            delay_timer: 0,
            sound_timer: 0,
            display: Display::new(),
            keypad: Keypad::new(),
            rng,
        }
    }

    /// Back to power-on state. The random source keeps its position.
    pub fn reset(&mut self) {
        self.memory = Memory::new();
        self.registers = RegisterBank::new();
        self.pc = PC_START_ADDR;
        self.index = 0;
        self.stack.clear();
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.display = Display::new();
        self.display.request_redraw();
        self.keypad.release_all();
    }

    pub fn random_byte(&mut self) -> u8 {
        self.rng.random::<u8>()
    }

    pub fn tick_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Draws the `rows`-byte sprite at `index`. The sprite is read in full
    /// before any pixel changes.
    pub fn draw_sprite(&mut self, x: u8, y: u8, rows: u8) -> Result<bool, Chip8Error> {
        let sprite = self.memory.read_range(self.index, usize::from(rows))?;
        Ok(self
            .display
            .draw_sprite(usize::from(x), usize::from(y), sprite))
    }
}

impl Default for Chip8State {
    fn default() -> Self {
        Self::new()
    }
}
