//! A CHIP-8 virtual machine: the fetch-decode-execute core plus a thin
//! terminal front end.

pub mod chip8;
pub mod display;
pub mod emulator;
pub mod error;
pub mod instruction;
pub mod settings;
pub mod stack;
pub mod state;

pub use chip8::{Chip8, RunState};
pub use error::Chip8Error;
