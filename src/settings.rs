use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_FRAME_RATE: u64 = 60;
pub const DEFAULT_INSTRUCTIONS_PER_SECOND: u64 = 700;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Run a CHIP-8 program in the terminal")]
pub struct Settings {
    /// Path to the ROM image.
    pub rom: PathBuf,

    /// Frames per second; timers count down once per frame.
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE, value_parser = clap::value_parser!(u64).range(1..=1000))]
    pub frame_rate: u64,

    /// Instructions executed per second.
    #[arg(long, default_value_t = DEFAULT_INSTRUCTIONS_PER_SECOND, value_parser = clap::value_parser!(u64).range(1..))]
    pub ips: u64,

    /// Seed for the random number opcode, for reproducible runs.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Settings {
    pub fn instructions_per_frame(&self) -> u64 {
        (self.ips / self.frame_rate).max(1)
    }
}
