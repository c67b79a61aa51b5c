use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use log::{debug, warn};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
};

use crate::chip8::{Chip8, RunState};
use crate::display::{DISPLAY_HEIGHT, DISPLAY_WIDTH, Display};
use crate::settings::Settings;
use crate::state::Key;

const KEY_MAPPING: &str = "Key Mapping:\n\
    1 2 3 4    →    1 2 3 C\n\
    Q W E R    →    4 5 6 D\n\
    A S D F    →    7 8 9 E\n\
    Z X C V    →    A 0 B F";

/// Conventional QWERTY layout for the hex keypad.
fn map_key(code: KeyCode) -> Option<Key> {
    let KeyCode::Char(c) = code else {
        return None;
    };
    let key = match c.to_ascii_lowercase() {
        '1' => Key::Key1,
        '2' => Key::Key2,
        '3' => Key::Key3,
        '4' => Key::KeyC,
        'q' => Key::Key4,
        'w' => Key::Key5,
        'e' => Key::Key6,
        'r' => Key::KeyD,
        'a' => Key::Key7,
        's' => Key::Key8,
        'd' => Key::Key9,
        'f' => Key::KeyE,
        'z' => Key::KeyA,
        'x' => Key::Key0,
        'c' => Key::KeyB,
        'v' => Key::KeyF,
        _ => return None,
    };
    Some(key)
}

fn is_quit(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

/// Puts the terminal back the way it was, on every exit path out of
/// [`Emulator::run`].
struct RawModeGuard {
    keyboard_enhanced: bool,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.keyboard_enhanced {
            if let Err(err) = execute!(std::io::stdout(), PopKeyboardEnhancementFlags) {
                warn!("failed to restore keyboard flags: {err}");
            }
        }
        if let Err(err) = disable_raw_mode() {
            warn!("failed to leave raw mode: {err}");
        }
    }
}

fn render_pixels(display: &Display) -> String {
    let mut rows = String::with_capacity((DISPLAY_WIDTH + 1) * DISPLAY_HEIGHT);
    for y in 0..DISPLAY_HEIGHT {
        for x in 0..DISPLAY_WIDTH {
            rows.push(if display.pixel(x, y) { '█' } else { ' ' });
        }
        rows.push('\n');
    }
    rows
}

/// Terminal host: paces frames, feeds the keypad, ticks timers and shows
/// the frame buffer.
pub struct Emulator {
    chip8: Chip8,
    settings: Settings,
    rom_name: String,
    screen: String,
}

impl Emulator {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let mut chip8 = match settings.seed {
            Some(seed) => Chip8::with_seed(seed),
            None => Chip8::new(),
        };
        chip8
            .load_rom_file(&settings.rom)
            .with_context(|| format!("could not load ROM {}", settings.rom.display()))?;

        let rom_name = settings
            .rom
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown ROM".to_string());
        let screen = render_pixels(chip8.display());

        Ok(Emulator {
            chip8,
            settings,
            rom_name,
            screen,
        })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut guard = RawModeGuard {
            keyboard_enhanced: false,
        };

        let key_releases = supports_keyboard_enhancement().unwrap_or(false);
        if key_releases {
            execute!(
                std::io::stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
            guard.keyboard_enhanced = true;
        }
        debug!("terminal reports key releases: {key_releases}");

        let mut terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))?;
        terminal.clear()?;

        let result = self.main_loop(&mut terminal, key_releases);
        terminal.clear()?;
        result
    }

    fn main_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
        key_releases: bool,
    ) -> anyhow::Result<()> {
        let frame_duration = Duration::from_secs_f64(1.0 / self.settings.frame_rate as f64);
        let instructions_per_frame = self.settings.instructions_per_frame();

        loop {
            let frame_start = Instant::now();

            if !self.poll_input(key_releases)? {
                debug!("quit requested");
                break;
            }

            self.chip8.tick_timers();
            self.chip8.run_frame(instructions_per_frame);

            if self.chip8.display().needs_redraw() {
                self.screen = render_pixels(self.chip8.display());
                self.chip8.display_mut().clear_redraw();
            }
            terminal.draw(|frame| {
                let area = frame.area();
                self.draw(frame, area);
            })?;

            // Without release events a key counts as held for one frame.
            if !key_releases {
                self.chip8.keypad_mut().release_all();
            }

            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
        Ok(())
    }

    /// Drains pending terminal events into the keypad. Returns `false` when
    /// the user asked to quit.
    fn poll_input(&mut self, key_releases: bool) -> anyhow::Result<bool> {
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if is_quit(&key) {
                return Ok(false);
            }
            let Some(chip8_key) = map_key(key.code) else {
                continue;
            };
            match key.kind {
                KeyEventKind::Release if key_releases => {
                    self.chip8.keypad_mut().release_key(chip8_key)
                }
                KeyEventKind::Release => {}
                _ => self.chip8.keypad_mut().press_key(chip8_key),
            }
        }
        Ok(true)
    }

    fn title(&self) -> String {
        match self.chip8.run_state() {
            RunState::Halted(err) => format!("{} [halted: {}]", self.rom_name, err),
            RunState::Running if self.chip8.sound_active() => format!("{} ♪", self.rom_name),
            RunState::Running => self.rom_name.clone(),
        }
    }

    fn draw(&self, frame: &mut ratatui::Frame, area: Rect) {
        let game_width = (DISPLAY_WIDTH as u16) + 2;
        let game_height = (DISPLAY_HEIGHT as u16) + 2;

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(game_height),
                Constraint::Length(7),
                Constraint::Min(0),
            ])
            .split(area);

        let game_area = if chunks[0].width > game_width {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Min(0),
                    Constraint::Length(game_width),
                    Constraint::Min(0),
                ])
                .split(chunks[0])[1]
        } else {
            chunks[0]
        };

        let border_color = if self.chip8.run_state().is_running() {
            Color::White
        } else {
            Color::Red
        };
        let game = Paragraph::new(self.screen.as_str())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(border_color))
                    .title(self.title()),
            )
            .style(Style::default().fg(Color::White));
        frame.render_widget(game, game_area);

        let keys = Paragraph::new(KEY_MAPPING)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Keypad"))
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(keys, chunks[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qwerty_layout_covers_all_sixteen_keys() {
        let mut seen: Vec<u8> = "1234qwerasdfzxcv"
            .chars()
            .filter_map(|c| map_key(KeyCode::Char(c)))
            .map(Key::index)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn mapping_ignores_case_and_other_keys() {
        assert_eq!(map_key(KeyCode::Char('Q')), Some(Key::Key4));
        assert_eq!(map_key(KeyCode::Char('p')), None);
        assert_eq!(map_key(KeyCode::Enter), None);
    }

    #[test]
    fn escape_and_ctrl_c_quit() {
        assert!(is_quit(&KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
    }

    #[test]
    fn raw_mode_guard_drops_cleanly_outside_raw_mode() {
        // Raw mode was never entered, so restoring is a no-op.
        drop(RawModeGuard {
            keyboard_enhanced: false,
        });
        drop(RawModeGuard {
            keyboard_enhanced: false,
        });
    }

    #[test]
    fn rendered_screen_has_one_line_per_row() {
        let mut display = Display::new();
        display.draw_sprite(0, 0, &[0x80]);
        let screen = render_pixels(&display);
        let lines: Vec<&str> = screen.lines().collect();
        assert_eq!(lines.len(), DISPLAY_HEIGHT);
        assert!(lines.iter().all(|l| l.chars().count() == DISPLAY_WIDTH));
        assert!(lines[0].starts_with('█'));
    }
}
