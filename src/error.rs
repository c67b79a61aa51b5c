use thiserror::Error;

/// Everything that can go wrong while loading or running a program.
///
/// ROM errors are recoverable by loading another image. All other variants
/// halt the current run.
#[derive(Debug, Error)]
pub enum Chip8Error {
    #[error("ROM is too large ({size} bytes), max size is {max_size} bytes")]
    RomTooLarge { size: usize, max_size: usize },

    #[error("ROM read returned {read} bytes, expected {expected}")]
    RomReadShort { read: usize, expected: usize },

    #[error("ROM read returned {read} bytes, more than the reported {expected}")]
    RomSizeMismatch { read: usize, expected: usize },

    #[error("failed to read ROM: {0}")]
    Io(#[from] std::io::Error),

    #[error("stack overflow: call depth exceeds {capacity}")]
    StackOverflow { capacity: usize },

    #[error("stack underflow: return with an empty call stack")]
    StackUnderflow,

    #[error("unknown opcode: {opcode:#06X}")]
    UnknownOpcode { opcode: u16 },

    #[error("memory access out of bounds at {address:#06X}")]
    MemoryOutOfBounds { address: usize },

    #[error("program counter out of bounds: {pc:#06X}")]
    ProgramCounterOutOfBounds { pc: u16 },
}
