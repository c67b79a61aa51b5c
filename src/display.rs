use bitvec::{BitArr, array::BitArray};

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;

/// Monochrome 64x32 frame buffer.
///
/// Only the clear and draw opcodes mutate pixels, and both raise the redraw
/// flag. The renderer lowers it with [`Display::clear_redraw`] once it has
/// presented the frame.
#[derive(Clone)]
pub struct Display {
    pixels: BitArr!(for DISPLAY_WIDTH * DISPLAY_HEIGHT),
    redraw: bool,
}

impl Display {
    pub fn new() -> Self {
        Display {
            pixels: BitArray::ZERO,
            redraw: false,
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(false);
        self.redraw = true;
    }

    /// XORs `sprite` onto the buffer, one byte per row, MSB leftmost.
    ///
    /// The origin wraps around the screen edges, but pixels that then fall
    /// past the right or bottom edge are clipped. Returns `true` if any lit
    /// pixel was switched off.
    pub fn draw_sprite(&mut self, x: usize, y: usize, sprite: &[u8]) -> bool {
        let origin_x = x % DISPLAY_WIDTH;
        let origin_y = y % DISPLAY_HEIGHT;
        let mut collision = false;

        for (row, &byte) in sprite.iter().enumerate() {
            let pixel_y = origin_y + row;
            if pixel_y >= DISPLAY_HEIGHT {
                break;
            }
            for bit in 0..8 {
                let pixel_x = origin_x + bit;
                if pixel_x >= DISPLAY_WIDTH {
                    break;
                }
                if (byte >> (7 - bit)) & 1 == 0 {
                    continue;
                }

                let index = pixel_y * DISPLAY_WIDTH + pixel_x;
                let current = self.pixels[index];
                collision |= current;
                self.pixels.set(index, !current);
            }
        }

        self.redraw = true;
        collision
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        x < DISPLAY_WIDTH && y < DISPLAY_HEIGHT && self.pixels[y * DISPLAY_WIDTH + x]
    }

    pub fn lit_pixels(&self) -> usize {
        self.pixels.count_ones()
    }

    pub fn needs_redraw(&self) -> bool {
        self.redraw
    }

    pub fn clear_redraw(&mut self) {
        self.redraw = false;
    }

    /// Marks the buffer dirty without touching pixels, e.g. after a reset.
    pub(crate) fn request_redraw(&mut self) {
        self.redraw = true;
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(display: &Display) -> Vec<bool> {
        (0..DISPLAY_HEIGHT)
            .flat_map(|y| (0..DISPLAY_WIDTH).map(move |x| (x, y)))
            .map(|(x, y)| display.pixel(x, y))
            .collect()
    }

    #[test]
    fn new_display_is_blank_and_clean() {
        let display = Display::new();
        assert_eq!(display.lit_pixels(), 0);
        assert!(!display.needs_redraw());
    }

    #[test]
    fn draw_sets_pixels_msb_first() {
        let mut display = Display::new();
        let collision = display.draw_sprite(0, 0, &[0b1000_0001]);
        assert!(!collision);
        assert!(display.pixel(0, 0));
        assert!(!display.pixel(1, 0));
        assert!(display.pixel(7, 0));
        assert_eq!(display.lit_pixels(), 2);
        assert!(display.needs_redraw());
    }

    #[test]
    fn drawing_twice_restores_buffer_and_reports_collision() {
        let mut display = Display::new();
        display.draw_sprite(3, 4, &[0xFF, 0x00, 0x3C]);
        display.draw_sprite(10, 5, &[0xF0, 0x90, 0xF0]);
        let before = snapshot(&display);

        assert!(!display.draw_sprite(30, 20, &[0xAA, 0x55, 0xFF]));
        assert!(display.draw_sprite(30, 20, &[0xAA, 0x55, 0xFF]));
        assert_eq!(snapshot(&display), before);
    }

    #[test]
    fn overlapping_sprite_turns_shared_pixels_off() {
        let mut display = Display::new();
        display.draw_sprite(0, 0, &[0b1100_0000]);
        let collision = display.draw_sprite(1, 0, &[0b1100_0000]);
        assert!(collision);
        assert!(display.pixel(0, 0));
        assert!(!display.pixel(1, 0));
        assert!(display.pixel(2, 0));
    }

    #[test]
    fn origin_wraps_around_the_screen() {
        let mut display = Display::new();
        display.draw_sprite(DISPLAY_WIDTH + 2, DISPLAY_HEIGHT + 1, &[0x80]);
        assert!(display.pixel(2, 1));
        assert_eq!(display.lit_pixels(), 1);
    }

    #[test]
    fn pixels_past_the_edges_are_clipped() {
        let mut display = Display::new();
        display.draw_sprite(60, 30, &[0xFF, 0xFF, 0xFF, 0xFF]);
        // 4 columns x 2 rows survive, nothing wraps to the left or top.
        assert_eq!(display.lit_pixels(), 8);
        assert!(display.pixel(63, 31));
        assert!(!display.pixel(0, 30));
        assert!(!display.pixel(60, 0));
    }

    #[test]
    fn clear_blanks_every_pixel_and_sets_redraw() {
        let mut display = Display::new();
        display.draw_sprite(0, 0, &[0xFF; 15]);
        display.clear_redraw();

        display.clear();
        assert_eq!(display.lit_pixels(), 0);
        assert!(display.needs_redraw());
    }

    #[test]
    fn empty_sprite_still_sets_redraw() {
        let mut display = Display::new();
        assert!(!display.draw_sprite(0, 0, &[]));
        assert!(display.needs_redraw());
        display.clear_redraw();
        assert!(!display.needs_redraw());
    }
}
