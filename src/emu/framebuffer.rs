use super::Mode;

/// Monochrome framebuffer, one byte per pixel (0 = off, nonzero = on),
/// row-major with stride equal to the width.
///
/// The buffer knows nothing about color; renderers map cells to whatever
/// palette they like. Out-of-range reads return off and out-of-range writes
/// are dropped, so sprites and scrolls clip at the edges instead of wrapping.
pub struct Framebuffer {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl Framebuffer {
    pub fn new(mode: Mode) -> Self {
        let (width, height) = mode.display_size();
        Framebuffer {
            width,
            height,
            cells: vec![0; width * height],
        }
    }

    /// Resizes the buffer for `mode` and clears it. Called on every mode
    /// switch opcode, so it must not retain stale geometry.
    pub fn init(&mut self, mode: Mode) {
        let (width, height) = mode.display_size();
        self.width = width;
        self.height = height;
        self.cells.clear();
        self.cells.resize(width * height, 0);
    }

    /// Turns every pixel off.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes per row. No padding, always equal to the width.
    pub fn stride(&self) -> usize {
        self.width
    }

    /// Read-only view of the pixel cells for renderers to blit.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Returns the pixel state at `(x, y)`, or `false` outside the buffer.
    pub fn get_pixel(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= self.width as i32 || y < 0 || y >= self.height as i32 {
            return false;
        }
        self.cells[y as usize * self.width + x as usize] != 0
    }

    /// Sets the pixel at `(x, y)`. Writes outside the buffer are dropped.
    pub fn set_pixel(&mut self, x: i32, y: i32, on: bool) {
        if x < 0 || x >= self.width as i32 || y < 0 || y >= self.height as i32 {
            return;
        }
        self.cells[y as usize * self.width + x as usize] = on as u8;
    }

    /// Shifts the image by `delta` columns, positive = right, negative = left.
    ///
    /// Rewrites from the far edge inward, reading the pre-shift source pixel,
    /// so columns shifting in from the edge are off and columns pushed past
    /// the far edge are discarded. Works for |delta| up to the full width.
    pub fn scroll_hor(&mut self, delta: i32) {
        if delta > 0 {
            for x in (0..self.width as i32).rev() {
                for y in 0..self.height as i32 {
                    let on = self.get_pixel(x - delta, y);
                    self.set_pixel(x, y, on);
                }
            }
        } else if delta < 0 {
            for x in 0..self.width as i32 {
                for y in 0..self.height as i32 {
                    let on = self.get_pixel(x - delta, y);
                    self.set_pixel(x, y, on);
                }
            }
        }
    }

    /// Shifts the image by `delta` rows, positive = down, negative = up.
    pub fn scroll_ver(&mut self, delta: i32) {
        if delta > 0 {
            for y in (0..self.height as i32).rev() {
                for x in 0..self.width as i32 {
                    let on = self.get_pixel(x, y - delta);
                    self.set_pixel(x, y, on);
                }
            }
        } else if delta < 0 {
            for y in 0..self.height as i32 {
                for x in 0..self.width as i32 {
                    let on = self.get_pixel(x, y - delta);
                    self.set_pixel(x, y, on);
                }
            }
        }
    }

    /// XOR-blits a sprite with its top-left corner at `(x, y)` and reports
    /// whether any pixel was erased (collision).
    ///
    /// With `byte_count > 0` the sprite is 8 pixels wide and `byte_count` rows
    /// tall, one byte per row, MSB first. `byte_count == 0` selects a 16x16
    /// sprite of two bytes per row. Missing trailing bytes in `sprite` are
    /// treated as empty rows; off-screen pixels clip per the pixel contract.
    pub fn draw_sprite(&mut self, sprite: &[u8], x: i32, y: i32, byte_count: usize) -> bool {
        let mut collision = false;

        if byte_count == 0 {
            for row in 0..16 {
                collision |= self.blit_row(sprite.get(row * 2), x, y + row as i32);
                collision |= self.blit_row(sprite.get(row * 2 + 1), x + 8, y + row as i32);
            }
        } else {
            for row in 0..byte_count {
                collision |= self.blit_row(sprite.get(row), x, y + row as i32);
            }
        }

        collision
    }

    /// XOR-blits one 8-pixel sprite row, returning whether a pixel was erased.
    fn blit_row(&mut self, row: Option<&u8>, x: i32, y: i32) -> bool {
        let Some(&byte) = row else { return false };

        let mut collision = false;
        for bit in 0..8 {
            // Is the pixel set in the sprite?
            if byte & (0x80 >> bit) != 0 {
                let px = x + bit;
                if self.get_pixel(px, y) {
                    // Already on, turn it off and record the collision
                    self.set_pixel(px, y, false);
                    collision = true;
                } else {
                    self.set_pixel(px, y, true);
                }
            }
        }
        collision
    }
}
