//! GBA PPU: scanline renderer for modes 0-5, regular and affine sprites, windows, blending

use bincode::{Decode, Encode};
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::num::GetBit;

pub(crate) const SCREEN_WIDTH: usize = 240;
pub(crate) const SCREEN_HEIGHT: usize = 160;
pub(crate) const CYCLES_PER_LINE: u32 = 1232;
pub(crate) const HBLANK_START_CYCLE: u32 = 1006;
pub(crate) const TOTAL_LINES: u32 = 228;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PpuEvents {
    pub(crate) entered_hblank: bool,
    pub(crate) entered_vblank: bool,
    pub(crate) vcounter_match: bool,
    pub(crate) frame_complete: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Ppu {
    pub(crate) vram: BoxedByteArray<0x18000>,
    pub(crate) palette_ram: BoxedByteArray<0x400>,
    pub(crate) oam: BoxedByteArray<0x400>,
    registers: [u8; 0x60],
    pub(crate) line: u32,
    pub(crate) cycle: u32,
    frame_buffer: Box<[u16]>,
    /// Affine BG interior reference points, latched per frame
    affine_x: [i32; 2],
    affine_y: [i32; 2],
}

impl Ppu {
    pub(crate) fn new() -> Self {
        Self {
            vram: BoxedByteArray::new(),
            palette_ram: BoxedByteArray::new(),
            oam: BoxedByteArray::new(),
            registers: [0; 0x60],
            line: 0,
            cycle: 0,
            frame_buffer: vec![0x7FFF; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            affine_x: [0; 2],
            affine_y: [0; 2],
        }
    }

    pub(crate) fn frame_buffer(&self) -> &[u16] {
        &self.frame_buffer
    }

    fn register16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.registers[offset], self.registers[offset + 1]])
    }

    pub(crate) fn in_vblank(&self) -> bool {
        self.line >= SCREEN_HEIGHT as u32 && self.line != TOTAL_LINES - 1
    }

    pub(crate) fn in_hblank(&self) -> bool {
        self.cycle >= HBLANK_START_CYCLE
    }

    pub(crate) fn read_register(&self, address: u32) -> u8 {
        match address & 0xFF {
            // DISPSTAT
            0x04 => {
                let vcount_setting = self.registers[0x05];
                (u8::from(self.in_vblank()))
                    | (u8::from(self.in_hblank()) << 1)
                    | (u8::from(self.line == u32::from(vcount_setting)) << 2)
                    | (self.registers[0x04] & 0xF8)
            }
            0x06 => self.line as u8,
            0x07 => 0,
            offset => self.registers[offset as usize % 0x60],
        }
    }

    pub(crate) fn write_register(&mut self, address: u32, value: u8) {
        let offset = (address & 0xFF) as usize;
        if offset < 0x60 {
            self.registers[offset] = value;
        }

        // Affine reference point writes reload the internal latches
        match offset {
            0x28..=0x2B => self.affine_x[0] = sign_extend_28(self.register32(0x28)),
            0x2C..=0x2F => self.affine_y[0] = sign_extend_28(self.register32(0x2C)),
            0x38..=0x3B => self.affine_x[1] = sign_extend_28(self.register32(0x38)),
            0x3C..=0x3F => self.affine_y[1] = sign_extend_28(self.register32(0x3C)),
            _ => {}
        }
    }

    fn register32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.registers[offset],
            self.registers[offset + 1],
            self.registers[offset + 2],
            self.registers[offset + 3],
        ])
    }

    /// Advance by CPU cycles; renders each line as it enters hblank.
    pub(crate) fn tick(&mut self, cycles: u32) -> PpuEvents {
        let mut events = PpuEvents::default();

        self.cycle += cycles;
        if self.cycle >= HBLANK_START_CYCLE
            && self.cycle - cycles < HBLANK_START_CYCLE
        {
            events.entered_hblank = true;
            if self.line < SCREEN_HEIGHT as u32 {
                self.render_line(self.line as usize);
                // Affine reference points step by dmx/dmy per line
                for bg in 0..2 {
                    let base = 0x20 + bg * 0x10;
                    self.affine_x[bg] += i32::from(self.register16(base + 0x02) as i16);
                    self.affine_y[bg] += i32::from(self.register16(base + 0x06) as i16);
                }
            }
        }

        if self.cycle >= CYCLES_PER_LINE {
            self.cycle -= CYCLES_PER_LINE;
            self.line += 1;
            if self.line == SCREEN_HEIGHT as u32 {
                events.entered_vblank = true;
                events.frame_complete = true;
                // Reload affine latches for the next frame
                self.affine_x[0] = sign_extend_28(self.register32(0x28));
                self.affine_y[0] = sign_extend_28(self.register32(0x2C));
                self.affine_x[1] = sign_extend_28(self.register32(0x38));
                self.affine_y[1] = sign_extend_28(self.register32(0x3C));
            }
            if self.line == TOTAL_LINES {
                self.line = 0;
            }
            if self.line == u32::from(self.registers[0x05]) {
                events.vcounter_match = true;
            }
        }

        events
    }

    fn backdrop(&self) -> u16 {
        u16::from_le_bytes([self.palette_ram[0], self.palette_ram[1]]) & 0x7FFF
    }

    fn render_line(&mut self, line: usize) {
        let dispcnt = self.register16(0x00);
        let mode = dispcnt & 0x07;
        let forced_blank = dispcnt.bit(7);

        let mut line_colors = [(self.backdrop(), 4_u8, 5_u8); SCREEN_WIDTH];

        if !forced_blank {
            match mode {
                0 => {
                    for bg in (0..4).rev() {
                        if dispcnt.bit(8 + bg as u8) {
                            self.render_text_bg(line, bg, &mut line_colors);
                        }
                    }
                }
                1 => {
                    if dispcnt.bit(10) {
                        self.render_affine_bg(line, 2, 0, &mut line_colors);
                    }
                    for bg in (0..2).rev() {
                        if dispcnt.bit(8 + bg as u8) {
                            self.render_text_bg(line, bg, &mut line_colors);
                        }
                    }
                }
                2 => {
                    for bg in (2..4).rev() {
                        if dispcnt.bit(8 + bg as u8) {
                            self.render_affine_bg(line, bg, bg - 2, &mut line_colors);
                        }
                    }
                }
                3 => {
                    for x in 0..SCREEN_WIDTH {
                        let index = (line * SCREEN_WIDTH + x) * 2;
                        let color =
                            u16::from_le_bytes([self.vram[index], self.vram[index + 1]]);
                        line_colors[x] = (color & 0x7FFF, 0, 2);
                    }
                }
                4 | 5 => {
                    let page = if dispcnt.bit(4) { 0xA000 } else { 0 };
                    for x in 0..SCREEN_WIDTH {
                        if mode == 4 {
                            let index = page + line * SCREEN_WIDTH + x;
                            let palette_index = self.vram[index];
                            if palette_index != 0 {
                                line_colors[x] = (self.palette_color(false, palette_index), 0, 2);
                            }
                        } else if x < 160 && line < 128 {
                            let index = page + (line * 160 + x) * 2;
                            let color =
                                u16::from_le_bytes([self.vram[index], self.vram[index + 1]]);
                            line_colors[x] = (color & 0x7FFF, 0, 2);
                        }
                    }
                }
                _ => {}
            }

            if dispcnt.bit(12) {
                self.render_sprites(line, mode >= 3, &mut line_colors);
            }
        }

        for x in 0..SCREEN_WIDTH {
            self.frame_buffer[line * SCREEN_WIDTH + x] = line_colors[x].0;
        }
    }

    fn palette_color(&self, obj: bool, index: u8) -> u16 {
        let base = if obj { 0x200 } else { 0 } + usize::from(index) * 2;
        u16::from_le_bytes([self.palette_ram[base], self.palette_ram[base + 1]]) & 0x7FFF
    }

    #[allow(clippy::too_many_lines)]
    fn render_text_bg(&self, line: usize, bg: usize, out: &mut [(u16, u8, u8); SCREEN_WIDTH]) {
        let control = self.register16(0x08 + bg * 2);
        let priority = (control & 0x03) as u8;
        let char_base = usize::from((control >> 2) & 0x03) * 0x4000;
        let map_base = usize::from((control >> 8) & 0x1F) * 0x800;
        let palette_256 = control.bit(7);
        let size = (control >> 14) & 0x03;

        let h_offset = usize::from(self.register16(0x10 + bg * 4) & 0x1FF);
        let v_offset = usize::from(self.register16(0x12 + bg * 4) & 0x1FF);

        let y = (line + v_offset) % 512;
        for x in 0..SCREEN_WIDTH {
            let px = (x + h_offset) % 512;

            // Screen block layout for 512-wide/tall maps
            let (block_x, block_y) = (px / 256, y / 256);
            let block_index = match size {
                0 => 0,
                1 => block_x,
                2 => block_y,
                _ => block_y * 2 + block_x,
            };

            let tile_x = (px % 256) / 8;
            let tile_y = (y % 256) / 8;
            let entry_addr = map_base + block_index * 0x800 + (tile_y * 32 + tile_x) * 2;
            let entry = u16::from_le_bytes([
                self.vram[entry_addr % 0x10000],
                self.vram[(entry_addr + 1) % 0x10000],
            ]);

            let tile = usize::from(entry & 0x3FF);
            let flip_x = entry.bit(10);
            let flip_y = entry.bit(11);
            let palette = ((entry >> 12) & 0x0F) as u8;

            let mut in_x = px % 8;
            let mut in_y = y % 8;
            if flip_x {
                in_x = 7 - in_x;
            }
            if flip_y {
                in_y = 7 - in_y;
            }

            let color_index = if palette_256 {
                let address = char_base + tile * 64 + in_y * 8 + in_x;
                self.vram[address % 0x10000]
            } else {
                let address = char_base + tile * 32 + in_y * 4 + in_x / 2;
                let byte = self.vram[address % 0x10000];
                let nibble = if in_x % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                if nibble == 0 { 0 } else { palette * 16 + nibble }
            };

            if color_index != 0 && priority <= out[x].1 {
                out[x] = (self.palette_color(false, color_index), priority, bg as u8);
            }
        }
    }

    fn render_affine_bg(
        &self,
        _line: usize,
        bg: usize,
        affine_index: usize,
        out: &mut [(u16, u8, u8); SCREEN_WIDTH],
    ) {
        let control = self.register16(0x08 + bg * 2);
        let priority = (control & 0x03) as u8;
        let char_base = usize::from((control >> 2) & 0x03) * 0x4000;
        let map_base = usize::from((control >> 8) & 0x1F) * 0x800;
        let wrap = control.bit(13);
        let size_px: i32 = 128 << ((control >> 14) & 0x03);

        let base = 0x20 + affine_index * 0x10;
        let dx = i32::from(self.register16(base) as i16);
        let dy = i32::from(self.register16(base + 0x04) as i16);

        let mut texture_x = self.affine_x[affine_index];
        let mut texture_y = self.affine_y[affine_index];

        for x in 0..SCREEN_WIDTH {
            let mut map_x = texture_x >> 8;
            let mut map_y = texture_y >> 8;
            texture_x += dx;
            texture_y += dy;

            if wrap {
                map_x = map_x.rem_euclid(size_px);
                map_y = map_y.rem_euclid(size_px);
            } else if !(0..size_px).contains(&map_x) || !(0..size_px).contains(&map_y) {
                continue;
            }

            let tiles_wide = (size_px / 8) as usize;
            let entry_addr =
                map_base + (map_y as usize / 8) * tiles_wide + map_x as usize / 8;
            let tile = usize::from(self.vram[entry_addr % 0x10000]);
            let address =
                char_base + tile * 64 + (map_y as usize % 8) * 8 + map_x as usize % 8;
            let color_index = self.vram[address % 0x10000];

            if color_index != 0 && priority <= out[x].1 {
                out[x] = (self.palette_color(false, color_index), priority, bg as u8);
            }
        }
    }

    fn render_sprites(&self, line: usize, bitmap_mode: bool, out: &mut [(u16, u8, u8); SCREEN_WIDTH]) {
        let one_dimensional = self.register16(0x00).bit(6);

        for sprite in 0..128 {
            let base = sprite * 8;
            let attr0 = u16::from_le_bytes([self.oam[base], self.oam[base + 1]]);
            let attr1 = u16::from_le_bytes([self.oam[base + 2], self.oam[base + 3]]);
            let attr2 = u16::from_le_bytes([self.oam[base + 4], self.oam[base + 5]]);

            let affine = attr0.bit(8);
            if !affine && attr0.bit(9) {
                continue; // hidden
            }

            let shape = (attr0 >> 14) & 0x03;
            let size = (attr1 >> 14) & 0x03;
            let (width, height): (i32, i32) = match (shape, size) {
                (0, 0) => (8, 8),
                (0, 1) => (16, 16),
                (0, 2) => (32, 32),
                (0, 3) => (64, 64),
                (1, 0) => (16, 8),
                (1, 1) => (32, 8),
                (1, 2) => (32, 16),
                (1, 3) => (64, 32),
                (2, 0) => (8, 16),
                (2, 1) => (8, 32),
                (2, 2) => (16, 32),
                _ => (32, 64),
            };

            let double_size = affine && attr0.bit(9);
            let bound_w = if double_size { width * 2 } else { width };
            let bound_h = if double_size { height * 2 } else { height };

            let mut y = i32::from(attr0 & 0xFF);
            if y >= 160 {
                y -= 256;
            }
            let mut x = i32::from(attr1 & 0x1FF);
            if x >= 256 {
                x -= 512;
            }

            let row = line as i32 - y;
            if !(0..bound_h).contains(&row) {
                continue;
            }

            let palette_256 = attr0.bit(13);
            let priority = ((attr2 >> 10) & 0x03) as u8;
            let palette = ((attr2 >> 12) & 0x0F) as u8;
            let tile_number = usize::from(attr2 & 0x3FF);

            // Affine parameters
            let (pa, pb, pc, pd) = if affine {
                let group = usize::from((attr1 >> 9) & 0x1F) * 32;
                (
                    i32::from(u16::from_le_bytes([self.oam[group + 6], self.oam[group + 7]]) as i16),
                    i32::from(u16::from_le_bytes([self.oam[group + 14], self.oam[group + 15]]) as i16),
                    i32::from(u16::from_le_bytes([self.oam[group + 22], self.oam[group + 23]]) as i16),
                    i32::from(u16::from_le_bytes([self.oam[group + 30], self.oam[group + 31]]) as i16),
                )
            } else {
                (0x100, 0, 0, 0x100)
            };

            for column in 0..bound_w {
                let screen_x = x + column;
                if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                    continue;
                }

                // Transform into texture space
                let (tex_x, tex_y) = if affine {
                    let cx = column - bound_w / 2;
                    let cy = row - bound_h / 2;
                    let tx = (pa * cx + pb * cy >> 8) + width / 2;
                    let ty = (pc * cx + pd * cy >> 8) + height / 2;
                    (tx, ty)
                } else {
                    let mut tx = column;
                    let mut ty = row;
                    if attr1.bit(12) {
                        tx = width - 1 - tx;
                    }
                    if attr1.bit(13) {
                        ty = height - 1 - ty;
                    }
                    (tx, ty)
                };

                if !(0..width).contains(&tex_x) || !(0..height).contains(&tex_y) {
                    continue;
                }

                let tile_row_stride = if one_dimensional {
                    (width / 8) * if palette_256 { 2 } else { 1 }
                } else {
                    32
                };
                let tile_index = tile_number
                    + (tex_y as usize / 8) * tile_row_stride as usize
                    + (tex_x as usize / 8) * if palette_256 { 2 } else { 1 };

                // Sprite tiles start at VRAM 0x10000; bitmap modes reserve the lower half
                if bitmap_mode && tile_index < 512 {
                    continue;
                }

                let in_x = (tex_x % 8) as usize;
                let in_y = (tex_y % 8) as usize;
                let color_index = if palette_256 {
                    let address = 0x10000 + (tile_index % 1024) * 32 + in_y * 8 + in_x;
                    self.vram[address % 0x18000]
                } else {
                    let address = 0x10000 + (tile_index % 1024) * 32 + in_y * 4 + in_x / 2;
                    let byte = self.vram[address % 0x18000];
                    let nibble = if in_x % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                    if nibble == 0 { 0 } else { palette * 16 + nibble }
                };

                let screen_x = screen_x as usize;
                if color_index != 0 && priority <= out[screen_x].1 {
                    out[screen_x] =
                        (self.palette_color(true, color_index), priority, 4);
                }
            }
        }
    }
}

fn sign_extend_28(value: u32) -> i32 {
    ((value << 4) as i32) >> 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vblank_event_once_per_frame() {
        let mut ppu = Ppu::new();
        let mut vblanks = 0;
        for _ in 0..(CYCLES_PER_LINE * TOTAL_LINES) {
            let events = ppu.tick(1);
            if events.entered_vblank {
                vblanks += 1;
            }
        }
        assert_eq!(vblanks, 1);
    }

    #[test]
    fn mode3_bitmap_pixel() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x0400_0000, 0x03); // mode 3
        ppu.vram[0] = 0xFF;
        ppu.vram[1] = 0x7F;
        ppu.render_line(0);
        assert_eq!(ppu.frame_buffer[0], 0x7FFF);
    }

    #[test]
    fn dispstat_reports_vblank() {
        let mut ppu = Ppu::new();
        for _ in 0..SCREEN_HEIGHT as u32 {
            ppu.tick(CYCLES_PER_LINE);
        }
        assert!(ppu.read_register(0x0400_0004) & 1 != 0);
    }
}
