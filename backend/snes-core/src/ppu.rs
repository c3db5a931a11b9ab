//! S-PPU: scanline renderer for BG modes 0-7, sprites, windows, and color math
//!
//! Lines render in one pass at hblank. Modes 5/6 render their 16-pixel-wide tiles at normal
//! resolution (the hi-res half-dots are averaged away), which is indistinguishable for games
//! that use them for text.

use bincode::{Decode, Encode};
use retrocore_common::boxedarray::{BoxedByteArray, BoxedWordArray};
use retrocore_common::num::GetBit;

pub(crate) const SCREEN_WIDTH: usize = 256;
pub(crate) const SCREEN_HEIGHT: usize = 224;
pub(crate) const TOTAL_LINES: u16 = 262;
pub(crate) const DOTS_PER_LINE: u16 = 341;
pub(crate) const VBLANK_START_LINE: u16 = 225;

const VRAM_LEN_WORDS: usize = 0x8000;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct BgConfig {
    tilemap_base: u16,
    tilemap_wide: bool,
    tilemap_tall: bool,
    tileset_base: u16,
    h_scroll: u16,
    v_scroll: u16,
    tile_16px: bool,
    mosaic: bool,
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct WindowConfig {
    w1_left: u8,
    w1_right: u8,
    w2_left: u8,
    w2_right: u8,
    /// Per layer (BG1-4, OBJ, color): 2 bits each of (enable, invert) for window 1
    layer_masks: [u8; 6],
    /// TMW/TSW: layers where the window masks the main/sub screen
    main_disable_mask: u8,
    sub_disable_mask: u8,
}

impl WindowConfig {
    fn inside(&self, layer: usize, x: u8) -> bool {
        let mask = self.layer_masks[layer];
        let w1_enabled = mask.bit(1);
        let w1_invert = mask.bit(0);
        let w2_enabled = mask.bit(3);
        let w2_invert = mask.bit(2);

        let in_w1 = (self.w1_left..=self.w1_right).contains(&x) != w1_invert;
        let in_w2 = (self.w2_left..=self.w2_right).contains(&x) != w2_invert;

        match (w1_enabled, w2_enabled) {
            (false, false) => false,
            (true, false) => in_w1,
            (false, true) => in_w2,
            // OR combination; the other logic modes are rare and collapse to OR here
            (true, true) => in_w1 || in_w2,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Ppu {
    vram: BoxedWordArray<VRAM_LEN_WORDS>,
    cgram: [u16; 256],
    oam: BoxedByteArray<544>,
    frame_buffer: Box<[u16]>,

    // INIDISP
    forced_blank: bool,
    brightness: u8,
    // OBSEL
    sprite_size_select: u8,
    sprite_tile_base: u16,
    sprite_tile_gap: u16,
    // OAM address
    oam_address_reload: u16,
    oam_address: u16,
    oam_latch: u8,
    // BG mode
    bg_mode: u8,
    bg3_priority: bool,
    bg: [BgConfig; 4],
    mosaic_size: u8,
    scroll_prev: u8,
    mode7_prev: u8,
    // VRAM port
    vram_address: u16,
    vram_increment: u16,
    vram_increment_on_high: bool,
    vram_remap: u8,
    vram_prefetch: u16,
    // Mode 7
    m7_matrix: [i16; 4],
    m7_center_x: i16,
    m7_center_y: i16,
    m7_h_flip: bool,
    m7_v_flip: bool,
    m7_wrap_fill: u8,
    // CGRAM port
    cgram_address: u8,
    cgram_latch: Option<u8>,
    // Windows
    window: WindowConfig,
    // Screens
    main_screen_layers: u8,
    sub_screen_layers: u8,
    // Color math
    color_math_add_sub: bool,
    color_math_half: bool,
    color_math_layers: u8,
    color_math_enable_mode: u8,
    sub_backdrop_color: u16,
    direct_color: bool,
    add_subscreen: bool,
    // Counters
    pub(crate) scanline: u16,
    pub(crate) dot: u16,
    frame_count: u64,
    frame_complete: bool,
    // Status
    range_over: bool,
    time_over: bool,
    h_latch: u16,
    v_latch: u16,
    // Multiply result from mode 7 A x B
    m7_multiply: i32,
}

impl Ppu {
    pub(crate) fn new() -> Self {
        Self {
            vram: BoxedWordArray::new(),
            cgram: [0; 256],
            oam: BoxedByteArray::new(),
            frame_buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            forced_blank: true,
            brightness: 0,
            sprite_size_select: 0,
            sprite_tile_base: 0,
            sprite_tile_gap: 0,
            oam_address_reload: 0,
            oam_address: 0,
            oam_latch: 0,
            bg_mode: 0,
            bg3_priority: false,
            bg: [BgConfig::default(); 4],
            mosaic_size: 0,
            scroll_prev: 0,
            mode7_prev: 0,
            vram_address: 0,
            vram_increment: 1,
            vram_increment_on_high: true,
            vram_remap: 0,
            vram_prefetch: 0,
            m7_matrix: [0x0100, 0, 0, 0x0100],
            m7_center_x: 0,
            m7_center_y: 0,
            m7_h_flip: false,
            m7_v_flip: false,
            m7_wrap_fill: 0,
            cgram_address: 0,
            cgram_latch: None,
            window: WindowConfig::default(),
            main_screen_layers: 0,
            sub_screen_layers: 0,
            color_math_add_sub: false,
            color_math_half: false,
            color_math_layers: 0,
            color_math_enable_mode: 0,
            sub_backdrop_color: 0,
            direct_color: false,
            add_subscreen: false,
            scanline: 0,
            dot: 0,
            frame_count: 0,
            frame_complete: false,
            range_over: false,
            time_over: false,
            h_latch: 0,
            v_latch: 0,
            m7_multiply: 0,
        }
    }

    pub(crate) fn frame_buffer(&self) -> &[u16] {
        &self.frame_buffer
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    pub(crate) fn in_vblank(&self) -> bool {
        self.scanline >= VBLANK_START_LINE
    }

    pub(crate) fn in_hblank(&self) -> bool {
        self.dot >= 274 || self.dot < 1
    }

    /// Advance by master cycles / 4 dots. Returns (entered_hblank, entered_vblank, line_start).
    pub(crate) fn advance_dots(&mut self, dots: u64) -> PpuEvents {
        let mut events = PpuEvents::default();

        for _ in 0..dots {
            self.dot += 1;
            if self.dot == 274 {
                events.entered_hblank = true;
                if self.scanline >= 1 && self.scanline <= SCREEN_HEIGHT as u16 {
                    self.render_line(self.scanline - 1);
                }
            }
            if self.dot == DOTS_PER_LINE {
                self.dot = 0;
                self.scanline += 1;
                events.line_start = true;
                if self.scanline == VBLANK_START_LINE {
                    events.entered_vblank = true;
                    self.frame_complete = true;
                    self.frame_count += 1;
                    self.oam_address = self.oam_address_reload;
                }
                if self.scanline == TOTAL_LINES {
                    self.scanline = 0;
                    events.frame_start = true;
                }
            }
        }

        events
    }

    // Rendering -----------------------------------------------------------------------------

    fn render_line(&mut self, line: u16) {
        let line_idx = line as usize;
        if line_idx >= SCREEN_HEIGHT {
            return;
        }

        if self.forced_blank {
            for x in 0..SCREEN_WIDTH {
                self.frame_buffer[line_idx * SCREEN_WIDTH + x] = 0;
            }
            return;
        }

        // Per-pixel (color, priority-rank, layer) for main and sub screens
        let mut main_pixels = [(self.cgram[0], -1_i32, 5_usize); SCREEN_WIDTH];
        let mut sub_pixels = [(self.sub_backdrop_color, -1_i32, 5_usize); SCREEN_WIDTH];

        let bg_count: usize = match self.bg_mode {
            0 => 4,
            1 | 5 => 3,
            2 | 3 | 4 | 6 => 2,
            _ => 1,
        };

        for bg_index in (0..bg_count).rev() {
            self.render_bg_line(line, bg_index, &mut main_pixels, &mut sub_pixels);
        }
        self.render_sprite_line(line, &mut main_pixels, &mut sub_pixels);

        // Composition with color math
        for x in 0..SCREEN_WIDTH {
            let (main_color, _, main_layer) = main_pixels[x];
            let (sub_color, _, _) = sub_pixels[x];

            let math_enabled = self.color_math_layers.bit(main_layer as u8)
                && self.color_math_enable_mode != 3
                && !(self.color_math_enable_mode == 2 && !self.window.inside(5, x as u8));

            let color = if math_enabled {
                let second = if self.add_subscreen { sub_color } else { self.sub_backdrop_color };
                blend(main_color, second, self.color_math_add_sub, self.color_math_half)
            } else {
                main_color
            };

            self.frame_buffer[line as usize * SCREEN_WIDTH + x] =
                apply_brightness(color, self.brightness);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn render_bg_line(
        &self,
        line: u16,
        bg_index: usize,
        main_pixels: &mut [(u16, i32, usize); SCREEN_WIDTH],
        sub_pixels: &mut [(u16, i32, usize); SCREEN_WIDTH],
    ) {
        let bpp: u8 = match (self.bg_mode, bg_index) {
            (0, _) => 2,
            (1, 0 | 1) => 4,
            (1, _) => 2,
            (2 | 3 | 4 | 5 | 6, 0) => match self.bg_mode {
                3 | 4 => 8,
                _ => 4,
            },
            (2, 1) => 4,
            (4, 1) => 2,
            (5, 1) => 2,
            (6, _) => 4,
            (2 | 3, 1) => 4,
            (7, _) => 8,
            _ => 2,
        };

        let on_main = self.main_screen_layers.bit(bg_index as u8);
        let on_sub = self.sub_screen_layers.bit(bg_index as u8);
        if !on_main && !on_sub {
            return;
        }

        let config = &self.bg[bg_index];
        let mosaic = if config.mosaic && self.mosaic_size > 0 {
            u16::from(self.mosaic_size) + 1
        } else {
            1
        };

        for x in 0..SCREEN_WIDTH as u16 {
            let sample_x = x / mosaic * mosaic;
            let sample_y = line / mosaic * mosaic;

            let (color_id, palette, tile_priority) = if self.bg_mode == 7 {
                self.mode7_sample(sample_x, sample_y)
            } else {
                self.bg_sample(config, bpp, sample_x, sample_y)
            };

            if color_id == 0 {
                continue;
            }

            let rank = bg_priority_rank(self.bg_mode, self.bg3_priority, bg_index, tile_priority);
            let color = self.palette_color(bpp, bg_index, palette, color_id);

            let masked = self.window.inside(bg_index, x as u8);
            let x = x as usize;
            if on_main
                && !(masked && self.window.main_disable_mask.bit(bg_index as u8))
                && rank > main_pixels[x].1
            {
                main_pixels[x] = (color, rank, bg_index);
            }
            if on_sub
                && !(masked && self.window.sub_disable_mask.bit(bg_index as u8))
                && rank > sub_pixels[x].1
            {
                sub_pixels[x] = (color, rank, bg_index);
            }
        }
    }

    fn bg_sample(&self, config: &BgConfig, bpp: u8, x: u16, y: u16) -> (u8, u8, bool) {
        let tile_px: u16 = if config.tile_16px { 16 } else { 8 };
        let scrolled_x = x.wrapping_add(config.h_scroll);
        let scrolled_y = y.wrapping_add(config.v_scroll);

        let tile_x = (scrolled_x / tile_px) & 0x3F;
        let tile_y = (scrolled_y / tile_px) & 0x3F;

        // Tilemap screens are 32x32 entries; wide/tall add extra screens
        let mut map_word = config.tilemap_base;
        let screen_x = tile_x >= 32;
        let screen_y = tile_y >= 32;
        if screen_x && config.tilemap_wide {
            map_word += 0x400;
        }
        if screen_y && config.tilemap_tall {
            map_word += if config.tilemap_wide { 0x800 } else { 0x400 };
        }
        map_word += (tile_y & 0x1F) * 32 + (tile_x & 0x1F);

        let entry = self.vram[(map_word as usize) & (VRAM_LEN_WORDS - 1)];
        let mut tile_number = entry & 0x3FF;
        let palette = ((entry >> 10) & 0x07) as u8;
        let priority = entry.bit(13);
        let flip_x = entry.bit(14);
        let flip_y = entry.bit(15);

        let mut in_tile_x = scrolled_x % tile_px;
        let mut in_tile_y = scrolled_y % tile_px;
        if flip_x {
            in_tile_x = tile_px - 1 - in_tile_x;
        }
        if flip_y {
            in_tile_y = tile_px - 1 - in_tile_y;
        }
        // 16px tiles select the adjacent tile number in the tileset grid
        if tile_px == 16 {
            if in_tile_x >= 8 {
                tile_number = tile_number.wrapping_add(1);
                in_tile_x -= 8;
            }
            if in_tile_y >= 8 {
                tile_number = tile_number.wrapping_add(16);
                in_tile_y -= 8;
            }
        }

        let words_per_tile = u16::from(bpp) * 4;
        let tile_base = config
            .tileset_base
            .wrapping_add(tile_number.wrapping_mul(words_per_tile));

        let mut color_id = 0_u8;
        for plane_pair in 0..(bpp / 2) {
            let word = self.vram[(tile_base
                .wrapping_add(u16::from(plane_pair) * 8 + in_tile_y)
                as usize)
                & (VRAM_LEN_WORDS - 1)];
            let low = word as u8;
            let high = (word >> 8) as u8;
            let bit = (7 - in_tile_x) as u8;
            color_id |= u8::from(low.bit(bit)) << (plane_pair * 2);
            color_id |= u8::from(high.bit(bit)) << (plane_pair * 2 + 1);
        }

        (color_id, palette, priority)
    }

    fn mode7_sample(&self, x: u16, y: u16) -> (u8, u8, bool) {
        let screen_x = if self.m7_h_flip { 255 - x } else { x };
        let screen_y = if self.m7_v_flip { 255 - y } else { y };

        let [a, b, c, d] = self.m7_matrix;
        let offset_x = i32::from(screen_x) - i32::from(self.m7_center_x);
        let offset_y = i32::from(screen_y) - i32::from(self.m7_center_y);

        // 8.8 fixed-point affine transform
        let vram_x = (i32::from(a) * offset_x + i32::from(b) * offset_y
            + (i32::from(self.m7_center_x) << 8))
            >> 8;
        let vram_y = (i32::from(c) * offset_x + i32::from(d) * offset_y
            + (i32::from(self.m7_center_y) << 8))
            >> 8;

        let out_of_bounds = !(0..1024).contains(&vram_x) || !(0..1024).contains(&vram_y);
        if out_of_bounds {
            match self.m7_wrap_fill {
                // Wrap
                0 | 1 => {}
                // Transparent outside
                2 => return (0, 0, false),
                // Tile 0 fill outside
                _ => {
                    let pixel = self.mode7_pixel(0, (vram_x & 7) as u16, (vram_y & 7) as u16);
                    return (pixel, 0, false);
                }
            }
        }

        let vram_x = (vram_x & 0x3FF) as u16;
        let vram_y = (vram_y & 0x3FF) as u16;
        let tile = self.vram[usize::from((vram_y / 8) * 128 + vram_x / 8)] as u8;
        let pixel = self.mode7_pixel(tile, vram_x % 8, vram_y % 8);
        (pixel, 0, false)
    }

    fn mode7_pixel(&self, tile: u8, x: u16, y: u16) -> u8 {
        let word = self.vram[usize::from(u16::from(tile) * 64 + y * 8 + x)];
        (word >> 8) as u8
    }

    fn palette_color(&self, bpp: u8, bg_index: usize, palette: u8, color_id: u8) -> u16 {
        if bpp == 8 {
            if self.direct_color {
                // Direct color: BBGGGRRR expanded to RGB555
                let r = u16::from(color_id & 0x07) << 2;
                let g = u16::from((color_id >> 3) & 0x07) << 2;
                let b = u16::from(color_id >> 6) << 3;
                return r | (g << 5) | (b << 10);
            }
            return self.cgram[color_id as usize];
        }

        let colors_per_palette = 1_u16 << bpp;
        // Mode 0 gives each BG its own 32-color block
        let base = if self.bg_mode == 0 { bg_index as u16 * 32 } else { 0 };
        self.cgram
            [usize::from(base + u16::from(palette) * colors_per_palette + u16::from(color_id))]
    }

    fn sprite_size(&self, large: bool) -> (u16, u16) {
        let sizes: [[(u16, u16); 2]; 8] = [
            [(8, 8), (16, 16)],
            [(8, 8), (32, 32)],
            [(8, 8), (64, 64)],
            [(16, 16), (32, 32)],
            [(16, 16), (64, 64)],
            [(32, 32), (64, 64)],
            [(16, 32), (32, 64)],
            [(16, 32), (32, 32)],
        ];
        sizes[usize::from(self.sprite_size_select & 0x07)][usize::from(large)]
    }

    fn render_sprite_line(
        &mut self,
        line: u16,
        main_pixels: &mut [(u16, i32, usize); SCREEN_WIDTH],
        sub_pixels: &mut [(u16, i32, usize); SCREEN_WIDTH],
    ) {
        let on_main = self.main_screen_layers.bit(4);
        let on_sub = self.sub_screen_layers.bit(4);
        if !on_main && !on_sub {
            return;
        }

        let mut sprites_on_line = 0;
        let mut tiles_on_line = 0;
        let mut line_pixels = [(0_u16, -1_i32); SCREEN_WIDTH];

        for sprite in 0..128_usize {
            let base = sprite * 4;
            let high_byte = self.oam[512 + sprite / 4];
            let high_shift = (sprite % 4) * 2;
            let x_high = high_byte.bit(high_shift as u8);
            let large = high_byte.bit(high_shift as u8 + 1);

            let (width, height) = self.sprite_size(large);
            let x = i32::from(self.oam[base]) - if x_high { 256 } else { 0 };
            let y = u16::from(self.oam[base + 1]);
            let tile = self.oam[base + 2];
            let attributes = self.oam[base + 3];

            let line_in_sprite = line.wrapping_sub(y) & 0xFF;
            if line_in_sprite >= height {
                continue;
            }

            sprites_on_line += 1;
            if sprites_on_line > 32 {
                self.range_over = true;
                break;
            }

            let mut row = line_in_sprite;
            if attributes.bit(7) {
                row = height - 1 - row;
            }

            let palette = (attributes >> 1) & 0x07;
            let priority = (attributes >> 4) & 0x03;
            let flip_x = attributes.bit(6);
            let table_base = self.sprite_tile_base
                + if attributes.bit(0) { 0x1000 + self.sprite_tile_gap } else { 0 };

            let tile_count = width / 8;
            for tile_index in 0..tile_count {
                tiles_on_line += 1;
                if tiles_on_line > 34 {
                    self.time_over = true;
                    break;
                }

                let column = if flip_x { tile_count - 1 - tile_index } else { tile_index };
                let tile_number = (u16::from(tile) & 0x1FF)
                    .wrapping_add(column)
                    .wrapping_add((row / 8) * 16)
                    & 0x1FF;
                let tile_addr = table_base.wrapping_add(tile_number * 16 + (row % 8));

                for pixel in 0..8_u16 {
                    let screen_x = x + i32::from(tile_index * 8 + pixel);
                    if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                        continue;
                    }

                    let bit = if flip_x { pixel } else { 7 - pixel } as u8;
                    let word0 =
                        self.vram[(tile_addr as usize) & (VRAM_LEN_WORDS - 1)];
                    let word1 =
                        self.vram[((tile_addr + 8) as usize) & (VRAM_LEN_WORDS - 1)];
                    let color_id = u8::from((word0 as u8).bit(bit))
                        | (u8::from(((word0 >> 8) as u8).bit(bit)) << 1)
                        | (u8::from((word1 as u8).bit(bit)) << 2)
                        | (u8::from(((word1 >> 8) as u8).bit(bit)) << 3);
                    if color_id == 0 {
                        continue;
                    }

                    let screen_x = screen_x as usize;
                    // First sprite in OAM order wins
                    if line_pixels[screen_x].1 >= 0 {
                        continue;
                    }

                    let color =
                        self.cgram[usize::from(128 + u16::from(palette) * 16 + u16::from(color_id))];
                    line_pixels[screen_x] = (color, i32::from(priority));
                }
            }
        }

        for x in 0..SCREEN_WIDTH {
            let (color, priority) = line_pixels[x];
            if priority < 0 {
                continue;
            }
            // Sprite priority ranks interleave with backgrounds
            let rank = 3 + priority * 3;
            let masked = self.window.inside(4, x as u8);
            if on_main && !(masked && self.window.main_disable_mask.bit(4)) && rank > main_pixels[x].1
            {
                main_pixels[x] = (color, rank, 4);
            }
            if on_sub && !(masked && self.window.sub_disable_mask.bit(4)) && rank > sub_pixels[x].1 {
                sub_pixels[x] = (color, rank, 4);
            }
        }
    }

    // Register interface --------------------------------------------------------------------

    fn vram_port_address(&self) -> usize {
        let address = self.vram_address;
        let remapped = match self.vram_remap {
            0 => address,
            1 => (address & 0xFF00) | ((address & 0x001F) << 3) | ((address >> 5) & 0x07),
            2 => (address & 0xFE00) | ((address & 0x003F) << 3) | ((address >> 6) & 0x07),
            _ => (address & 0xFC00) | ((address & 0x007F) << 3) | ((address >> 7) & 0x07),
        };
        (remapped as usize) & (VRAM_LEN_WORDS - 1)
    }

    pub(crate) fn read_register(&mut self, address: u16, mdr: u8) -> Option<u8> {
        match address {
            0x2134 => Some(self.m7_multiply as u8),
            0x2135 => Some((self.m7_multiply >> 8) as u8),
            0x2136 => Some((self.m7_multiply >> 16) as u8),
            0x2137 => {
                self.h_latch = self.dot;
                self.v_latch = self.scanline;
                Some(mdr)
            }
            0x2138 => {
                let value = self.oam[(self.oam_address as usize) % 544];
                self.oam_address = (self.oam_address + 1) % 544;
                Some(value)
            }
            0x2139 => {
                let value = self.vram_prefetch as u8;
                if !self.vram_increment_on_high {
                    self.vram_prefetch = self.vram[self.vram_port_address()];
                    self.vram_address = self.vram_address.wrapping_add(self.vram_increment);
                }
                Some(value)
            }
            0x213A => {
                let value = (self.vram_prefetch >> 8) as u8;
                if self.vram_increment_on_high {
                    self.vram_prefetch = self.vram[self.vram_port_address()];
                    self.vram_address = self.vram_address.wrapping_add(self.vram_increment);
                }
                Some(value)
            }
            0x213B => {
                let value = self.cgram[usize::from(self.cgram_address)] as u8;
                self.cgram_address = self.cgram_address.wrapping_add(1);
                Some(value)
            }
            0x213C => Some(self.h_latch as u8),
            0x213D => Some(self.v_latch as u8),
            0x213E => {
                // STAT77: 5C5 version bits plus the sprite overflow flags
                Some(
                    0x01 | (u8::from(std::mem::take(&mut self.range_over)) << 6)
                        | (u8::from(std::mem::take(&mut self.time_over)) << 7),
                )
            }
            0x213F => Some(0x03),
            _ => None,
        }
    }

    #[allow(clippy::too_many_lines)]
    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0x2100 => {
                self.forced_blank = value.bit(7);
                self.brightness = value & 0x0F;
            }
            0x2101 => {
                self.sprite_size_select = value >> 5;
                self.sprite_tile_gap = u16::from((value >> 3) & 0x03) << 12;
                self.sprite_tile_base = u16::from(value & 0x07) << 13;
            }
            0x2102 => {
                self.oam_address_reload = (self.oam_address_reload & 0x200) | (u16::from(value) << 1);
                self.oam_address = self.oam_address_reload;
            }
            0x2103 => {
                self.oam_address_reload =
                    (self.oam_address_reload & 0x1FE) | (u16::from(value & 0x01) << 9);
                self.oam_address = self.oam_address_reload;
            }
            0x2104 => {
                let oam_address = self.oam_address as usize % 544;
                if oam_address < 512 {
                    if oam_address % 2 == 0 {
                        self.oam_latch = value;
                    } else {
                        self.oam[oam_address - 1] = self.oam_latch;
                        self.oam[oam_address] = value;
                    }
                } else {
                    self.oam[oam_address] = value;
                }
                self.oam_address = (self.oam_address + 1) % 544;
            }
            0x2105 => {
                self.bg_mode = value & 0x07;
                self.bg3_priority = value.bit(3);
                for (i, config) in self.bg.iter_mut().enumerate() {
                    config.tile_16px = value.bit(4 + i as u8);
                }
            }
            0x2106 => {
                self.mosaic_size = value >> 4;
                for (i, config) in self.bg.iter_mut().enumerate() {
                    config.mosaic = value.bit(i as u8);
                }
            }
            0x2107..=0x210A => {
                let config = &mut self.bg[usize::from(address - 0x2107)];
                config.tilemap_base = u16::from(value & 0xFC) << 8;
                config.tilemap_wide = value.bit(0);
                config.tilemap_tall = value.bit(1);
            }
            0x210B => {
                self.bg[0].tileset_base = u16::from(value & 0x0F) << 12;
                self.bg[1].tileset_base = u16::from(value >> 4) << 12;
            }
            0x210C => {
                self.bg[2].tileset_base = u16::from(value & 0x0F) << 12;
                self.bg[3].tileset_base = u16::from(value >> 4) << 12;
            }
            0x210D..=0x2114 => {
                let bg_index = usize::from((address - 0x210D) / 2);
                let horizontal = (address - 0x210D) % 2 == 0;
                let config = &mut self.bg[bg_index];
                if horizontal {
                    config.h_scroll =
                        ((u16::from(value) << 8) | u16::from(self.scroll_prev)) & 0x3FF;
                } else {
                    config.v_scroll =
                        ((u16::from(value) << 8) | u16::from(self.scroll_prev)) & 0x3FF;
                }
                self.scroll_prev = value;
            }
            0x2115 => {
                self.vram_increment_on_high = value.bit(7);
                self.vram_increment = match value & 0x03 {
                    0 => 1,
                    1 => 32,
                    _ => 128,
                };
                self.vram_remap = (value >> 2) & 0x03;
            }
            0x2116 => {
                self.vram_address = (self.vram_address & 0xFF00) | u16::from(value);
                self.vram_prefetch = self.vram[self.vram_port_address()];
            }
            0x2117 => {
                self.vram_address = (self.vram_address & 0x00FF) | (u16::from(value) << 8);
                self.vram_prefetch = self.vram[self.vram_port_address()];
            }
            0x2118 => {
                let index = self.vram_port_address();
                self.vram[index] = (self.vram[index] & 0xFF00) | u16::from(value);
                if !self.vram_increment_on_high {
                    self.vram_address = self.vram_address.wrapping_add(self.vram_increment);
                }
            }
            0x2119 => {
                let index = self.vram_port_address();
                self.vram[index] = (self.vram[index] & 0x00FF) | (u16::from(value) << 8);
                if self.vram_increment_on_high {
                    self.vram_address = self.vram_address.wrapping_add(self.vram_increment);
                }
            }
            0x211A => {
                self.m7_h_flip = value.bit(0);
                self.m7_v_flip = value.bit(1);
                self.m7_wrap_fill = value >> 6;
            }
            0x211B..=0x211E => {
                let index = usize::from(address - 0x211B);
                let word = ((u16::from(value) << 8) | u16::from(self.mode7_prev)) as i16;
                self.m7_matrix[index] = word;
                self.mode7_prev = value;
                // MPY result is M7A * M7B's high byte
                self.m7_multiply =
                    i32::from(self.m7_matrix[0]) * i32::from((self.m7_matrix[1] >> 8) as i8);
            }
            0x211F => {
                let word = ((u16::from(value) << 8) | u16::from(self.mode7_prev)) as i16;
                self.m7_center_x = ((word << 3) >> 3) as i16;
                self.mode7_prev = value;
            }
            0x2120 => {
                let word = ((u16::from(value) << 8) | u16::from(self.mode7_prev)) as i16;
                self.m7_center_y = ((word << 3) >> 3) as i16;
                self.mode7_prev = value;
            }
            0x2121 => {
                self.cgram_address = value;
                self.cgram_latch = None;
            }
            0x2122 => match self.cgram_latch.take() {
                None => self.cgram_latch = Some(value),
                Some(low) => {
                    self.cgram[usize::from(self.cgram_address)] =
                        (u16::from(value & 0x7F) << 8) | u16::from(low);
                    self.cgram_address = self.cgram_address.wrapping_add(1);
                }
            },
            0x2123 => {
                self.window.layer_masks[0] = value & 0x0F;
                self.window.layer_masks[1] = value >> 4;
            }
            0x2124 => {
                self.window.layer_masks[2] = value & 0x0F;
                self.window.layer_masks[3] = value >> 4;
            }
            0x2125 => {
                self.window.layer_masks[4] = value & 0x0F;
                self.window.layer_masks[5] = value >> 4;
            }
            0x2126 => self.window.w1_left = value,
            0x2127 => self.window.w1_right = value,
            0x2128 => self.window.w2_left = value,
            0x2129 => self.window.w2_right = value,
            // $212A/B window combination logic: OR is the only supported combination
            0x212C => self.main_screen_layers = value & 0x1F,
            0x212D => self.sub_screen_layers = value & 0x1F,
            0x212E => self.window.main_disable_mask = value & 0x1F,
            0x212F => self.window.sub_disable_mask = value & 0x1F,
            0x2130 => {
                self.color_math_enable_mode = (value >> 4) & 0x03;
                self.add_subscreen = value.bit(1);
                self.direct_color = value.bit(0);
            }
            0x2131 => {
                self.color_math_add_sub = value.bit(7);
                self.color_math_half = value.bit(6);
                self.color_math_layers = value & 0x3F;
            }
            0x2132 => {
                let intensity = u16::from(value & 0x1F);
                if value.bit(7) {
                    self.sub_backdrop_color =
                        (self.sub_backdrop_color & 0x03FF) | (intensity << 10);
                }
                if value.bit(6) {
                    self.sub_backdrop_color =
                        (self.sub_backdrop_color & 0x7C1F) | (intensity << 5);
                }
                if value.bit(5) {
                    self.sub_backdrop_color = (self.sub_backdrop_color & 0x7FE0) | intensity;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PpuEvents {
    pub(crate) entered_hblank: bool,
    pub(crate) entered_vblank: bool,
    pub(crate) line_start: bool,
    pub(crate) frame_start: bool,
}

fn bg_priority_rank(mode: u8, bg3_priority: bool, bg_index: usize, tile_priority: bool) -> i32 {
    // Collapsed priority table: higher rank wins. Sprites occupy ranks 3/6/9/12.
    match (mode, bg_index, tile_priority) {
        (1, 2, true) if bg3_priority => 13,
        (_, 0, true) => 8,
        (_, 0, false) => 5,
        (_, 1, true) => 7,
        (_, 1, false) => 4,
        (_, 2, true) => 2,
        (_, 2, false) => 1,
        (_, 3, true) => 2,
        _ => 0,
    }
}

fn blend(main: u16, sub: u16, subtract: bool, half: bool) -> u16 {
    let mut result = 0_u16;
    for shift in [0_u16, 5, 10] {
        let a = (main >> shift) & 0x1F;
        let b = (sub >> shift) & 0x1F;
        let mut channel = if subtract { a.saturating_sub(b) } else { a + b };
        if half {
            channel /= 2;
        }
        result |= channel.min(0x1F) << shift;
    }
    result
}

fn apply_brightness(color: u16, brightness: u8) -> u16 {
    if brightness == 15 {
        return color;
    }
    let scale = u32::from(brightness) + 1;
    let mut result = 0_u16;
    for shift in [0_u16, 5, 10] {
        let channel = u32::from((color >> shift) & 0x1F);
        result |= ((channel * scale / 16) as u16) << shift;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vram_port_write_twice_increments_once() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2115, 0x80); // increment on high byte, step 1
        ppu.write_register(0x2116, 0x00);
        ppu.write_register(0x2117, 0x00);
        ppu.write_register(0x2118, 0x34);
        ppu.write_register(0x2119, 0x12);
        assert_eq!(ppu.vram[0], 0x1234);
        ppu.write_register(0x2118, 0x78);
        ppu.write_register(0x2119, 0x56);
        assert_eq!(ppu.vram[1], 0x5678);
    }

    #[test]
    fn cgram_word_write() {
        let mut ppu = Ppu::new();
        ppu.write_register(0x2121, 0x10);
        ppu.write_register(0x2122, 0xFF);
        ppu.write_register(0x2122, 0x7F);
        assert_eq!(ppu.cgram[0x10], 0x7FFF);
    }

    #[test]
    fn vblank_flag_set_once_per_frame() {
        let mut ppu = Ppu::new();
        let mut vblanks = 0;
        for _ in 0..(u64::from(TOTAL_LINES) * u64::from(DOTS_PER_LINE)) {
            let events = ppu.advance_dots(1);
            if events.entered_vblank {
                vblanks += 1;
            }
        }
        assert_eq!(vblanks, 1);
    }

    #[test]
    fn brightness_scales_channels() {
        assert_eq!(apply_brightness(0x7FFF, 15), 0x7FFF);
        assert_eq!(apply_brightness(0x7FFF, 7), {
            let c = 0x1F * 8 / 16;
            c | (c << 5) | (c << 10)
        });
    }

    #[test]
    fn color_math_add_saturates() {
        assert_eq!(blend(0x7FFF, 0x7FFF, false, false), 0x7FFF);
        assert_eq!(blend(0x7FFF, 0x7FFF, false, true), 0x7FFF);
        assert_eq!(blend(0x0000, 0x7FFF, true, false), 0x0000);
    }
}
