use chip8_vm::emulator::Emulator;
use chip8_vm::settings::Settings;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = Settings::parse();
    log::info!(
        "starting {} [frame rate: {} Hz, ips: {}]",
        settings.rom.display(),
        settings.frame_rate,
        settings.ips
    );

    let mut emulator = Emulator::new(settings)?;
    emulator.run()?;

    Ok(())
}
