//! NES PPU (2C02/2C07), cycle-driven
//!
//! One call to [`tick`] advances a single dot. Background rendering uses the hardware's
//! shift-register pipeline driven by the loopy v/t scroll registers; sprites are evaluated
//! per scanline into secondary OAM with the 8-sprite limit and the sprite overflow flag.

use crate::bus::PpuBus;
use bincode::{Decode, Encode};
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::frontend::TimingMode;
use retrocore_common::num::GetBit;

pub const SCREEN_WIDTH: u16 = 256;
pub const SCREEN_HEIGHT: u16 = 240;

const FRAME_BUFFER_LEN: usize = (SCREEN_WIDTH as usize) * (SCREEN_HEIGHT as usize);

const NTSC_SCANLINES: u16 = 262;
const PAL_SCANLINES: u16 = 312;
const DOTS_PER_LINE: u16 = 341;
const VBLANK_START_SCANLINE: u16 = 241;

/// PPU open bus decays to 0 after roughly 600ms; measured in PPU cycles.
const OPEN_BUS_DECAY_CYCLES: u32 = 5_360_000;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct SpriteData {
    y: u8,
    tile: u8,
    attributes: u8,
    x: u8,
    is_sprite_0: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Registers {
    // $2000 PPUCTRL
    nmi_enabled: bool,
    tall_sprites: bool,
    bg_pattern_table: u16,
    sprite_pattern_table: u16,
    vram_increment: u16,
    // $2001 PPUMASK
    grayscale: bool,
    show_bg_left: bool,
    show_sprites_left: bool,
    bg_enabled: bool,
    sprites_enabled: bool,
    emphasis: u8,
    // $2002 PPUSTATUS
    vblank_flag: bool,
    sprite_0_hit: bool,
    sprite_overflow: bool,
    // Internal latches
    oam_address: u8,
    write_toggle: bool,
    /// Current VRAM address (loopy v)
    v: u16,
    /// Temporary VRAM address (loopy t)
    t: u16,
    fine_x: u8,
    read_buffer: u8,
}

impl Registers {
    fn new() -> Self {
        Self {
            nmi_enabled: false,
            tall_sprites: false,
            bg_pattern_table: 0,
            sprite_pattern_table: 0,
            vram_increment: 1,
            grayscale: false,
            show_bg_left: false,
            show_sprites_left: false,
            bg_enabled: false,
            sprites_enabled: false,
            emphasis: 0,
            vblank_flag: false,
            sprite_0_hit: false,
            sprite_overflow: false,
            oam_address: 0,
            write_toggle: false,
            v: 0,
            t: 0,
            fine_x: 0,
            read_buffer: 0,
        }
    }

    fn rendering_enabled(&self) -> bool {
        self.bg_enabled || self.sprites_enabled
    }

    pub(crate) fn double_height_sprites(&self) -> bool {
        self.tall_sprites
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct BgPipeline {
    nametable_byte: u8,
    attribute_byte: u8,
    pattern_low_byte: u8,
    pattern_high_byte: u8,
    pattern_shift_low: u16,
    pattern_shift_high: u16,
    attribute_shift_low: u8,
    attribute_shift_high: u8,
    attribute_latch_low: bool,
    attribute_latch_high: bool,
}

impl BgPipeline {
    fn new() -> Self {
        Self {
            nametable_byte: 0,
            attribute_byte: 0,
            pattern_low_byte: 0,
            pattern_high_byte: 0,
            pattern_shift_low: 0,
            pattern_shift_high: 0,
            attribute_shift_low: 0,
            attribute_shift_high: 0,
            attribute_latch_low: false,
            attribute_latch_high: false,
        }
    }

    fn shift(&mut self) {
        self.pattern_shift_low <<= 1;
        self.pattern_shift_high <<= 1;
        self.attribute_shift_low = (self.attribute_shift_low << 1) | u8::from(self.attribute_latch_low);
        self.attribute_shift_high =
            (self.attribute_shift_high << 1) | u8::from(self.attribute_latch_high);
    }

    fn reload(&mut self) {
        self.pattern_shift_low = (self.pattern_shift_low & 0xFF00) | u16::from(self.pattern_low_byte);
        self.pattern_shift_high =
            (self.pattern_shift_high & 0xFF00) | u16::from(self.pattern_high_byte);
        self.attribute_latch_low = self.attribute_byte.bit(0);
        self.attribute_latch_high = self.attribute_byte.bit(1);
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PpuState {
    timing_mode: TimingMode,
    registers: Registers,
    oam: [u8; 256],
    secondary_oam: [SpriteData; 8],
    sprite_count: u8,
    sprite_pattern_low: [u8; 8],
    sprite_pattern_high: [u8; 8],
    bg: BgPipeline,
    scanline: u16,
    dot: u16,
    odd_frame: bool,
    frame_count: u64,
    pending_nmi_suppression: bool,
    open_bus: u8,
    open_bus_age: u32,
    frame_buffer: BoxedByteArray<FRAME_BUFFER_LEN>,
    frame_complete: bool,
}

impl PpuState {
    pub(crate) fn new(timing_mode: TimingMode) -> Self {
        Self {
            timing_mode,
            registers: Registers::new(),
            oam: [0; 256],
            secondary_oam: [SpriteData::default(); 8],
            sprite_count: 0,
            sprite_pattern_low: [0; 8],
            sprite_pattern_high: [0; 8],
            bg: BgPipeline::new(),
            scanline: 0,
            dot: 0,
            odd_frame: false,
            frame_count: 0,
            pending_nmi_suppression: false,
            open_bus: 0,
            open_bus_age: 0,
            frame_buffer: BoxedByteArray::new(),
            frame_complete: false,
        }
    }

    fn total_scanlines(&self) -> u16 {
        match self.timing_mode {
            TimingMode::Ntsc => NTSC_SCANLINES,
            TimingMode::Pal => PAL_SCANLINES,
        }
    }

    /// 6-bit palette index per pixel; the frontend applies the palette table.
    pub fn frame_buffer(&self) -> &[u8] {
        self.frame_buffer.as_slice()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn in_vblank(&self) -> bool {
        self.registers.vblank_flag
    }

    pub(crate) fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    pub(crate) fn nmi_line(&self) -> bool {
        self.registers.vblank_flag && self.registers.nmi_enabled
    }

    pub(crate) fn is_rendering(&self) -> bool {
        self.registers.rendering_enabled() && self.scanline < SCREEN_HEIGHT
    }

    pub(crate) fn registers(&self) -> &Registers {
        &self.registers
    }

    pub(crate) fn reset(&mut self) {
        self.registers = Registers::new();
        self.scanline = 0;
        self.dot = 0;
        self.odd_frame = false;
    }

    // CPU-visible register interface --------------------------------------------------------

    pub(crate) fn read_register(&mut self, address: u16, bus: &mut PpuBus<'_>) -> u8 {
        let value = match address & 0x2007 {
            0x2002 => {
                let value = (u8::from(self.registers.vblank_flag) << 7)
                    | (u8::from(self.registers.sprite_0_hit) << 6)
                    | (u8::from(self.registers.sprite_overflow) << 5)
                    | (self.open_bus & 0x1F);
                self.registers.vblank_flag = false;
                self.registers.write_toggle = false;
                // Reading within a dot of VBlank start suppresses the NMI for this frame
                if self.scanline == VBLANK_START_SCANLINE && self.dot <= 1 {
                    self.pending_nmi_suppression = true;
                }
                value
            }
            0x2004 => {
                // During rendering this would return secondary OAM contents; outside
                // rendering it reads OAM directly
                self.oam[self.registers.oam_address as usize]
            }
            0x2007 => {
                let v = self.registers.v & 0x3FFF;
                let value = if v >= 0x3F00 {
                    // Palette reads are direct, but refresh the buffer from the underlying
                    // nametable byte
                    self.registers.read_buffer = bus.read(v & 0x2FFF);
                    bus.read_palette(v)
                } else {
                    let buffered = self.registers.read_buffer;
                    self.registers.read_buffer = bus.read(v);
                    buffered
                };
                self.increment_v_for_cpu_access();
                value
            }
            _ => self.open_bus,
        };

        self.open_bus = value;
        self.open_bus_age = 0;
        value
    }

    pub(crate) fn write_register(&mut self, address: u16, value: u8, bus: &mut PpuBus<'_>) {
        self.open_bus = value;
        self.open_bus_age = 0;

        match address & 0x2007 {
            0x2000 => {
                self.registers.t = (self.registers.t & 0x73FF) | (u16::from(value & 0x03) << 10);
                self.registers.vram_increment = if value.bit(2) { 32 } else { 1 };
                self.registers.sprite_pattern_table = u16::from(value.bit(3)) * 0x1000;
                self.registers.bg_pattern_table = u16::from(value.bit(4)) * 0x1000;
                self.registers.tall_sprites = value.bit(5);
                self.registers.nmi_enabled = value.bit(7);
            }
            0x2001 => {
                self.registers.grayscale = value.bit(0);
                self.registers.show_bg_left = value.bit(1);
                self.registers.show_sprites_left = value.bit(2);
                self.registers.bg_enabled = value.bit(3);
                self.registers.sprites_enabled = value.bit(4);
                self.registers.emphasis = value >> 5;
            }
            0x2003 => {
                self.registers.oam_address = value;
            }
            0x2004 => {
                self.oam[self.registers.oam_address as usize] = value;
                self.registers.oam_address = self.registers.oam_address.wrapping_add(1);
            }
            0x2005 => {
                if !self.registers.write_toggle {
                    self.registers.t = (self.registers.t & 0x7FE0) | u16::from(value >> 3);
                    self.registers.fine_x = value & 0x07;
                } else {
                    self.registers.t = (self.registers.t & 0x0C1F)
                        | (u16::from(value & 0x07) << 12)
                        | (u16::from(value >> 3) << 5);
                }
                self.registers.write_toggle = !self.registers.write_toggle;
            }
            0x2006 => {
                if !self.registers.write_toggle {
                    self.registers.t =
                        (self.registers.t & 0x00FF) | (u16::from(value & 0x3F) << 8);
                } else {
                    self.registers.t = (self.registers.t & 0x7F00) | u16::from(value);
                    self.registers.v = self.registers.t;
                }
                self.registers.write_toggle = !self.registers.write_toggle;
            }
            0x2007 => {
                let v = self.registers.v & 0x3FFF;
                if v >= 0x3F00 {
                    bus.write_palette(v, value);
                } else {
                    bus.write(v, value);
                }
                self.increment_v_for_cpu_access();
            }
            _ => {}
        }
    }

    pub(crate) fn write_oam_dma_byte(&mut self, value: u8) {
        self.oam[self.registers.oam_address as usize] = value;
        self.registers.oam_address = self.registers.oam_address.wrapping_add(1);
    }

    fn increment_v_for_cpu_access(&mut self) {
        // During rendering, $2007 access performs the coarse X + fine Y glitch increment
        if self.is_rendering() {
            self.increment_coarse_x();
            self.increment_fine_y();
        } else {
            self.registers.v =
                self.registers.v.wrapping_add(self.registers.vram_increment) & 0x7FFF;
        }
    }

    // Scroll register increments ------------------------------------------------------------

    fn increment_coarse_x(&mut self) {
        let v = self.registers.v;
        if v & 0x001F == 0x001F {
            self.registers.v = (v & !0x001F) ^ 0x0400;
        } else {
            self.registers.v = v + 1;
        }
    }

    fn increment_fine_y(&mut self) {
        let v = self.registers.v;
        if v & 0x7000 != 0x7000 {
            self.registers.v = v + 0x1000;
        } else {
            let mut coarse_y = (v >> 5) & 0x1F;
            let mut nt_switch = 0;
            if coarse_y == 29 {
                coarse_y = 0;
                nt_switch = 0x0800;
            } else if coarse_y == 31 {
                coarse_y = 0;
            } else {
                coarse_y += 1;
            }
            self.registers.v = ((v & !0x73E0) | (coarse_y << 5)) ^ nt_switch;
        }
    }

    // Per-dot state machine -----------------------------------------------------------------

    pub(crate) fn tick(&mut self, bus: &mut PpuBus<'_>) {
        self.open_bus_age += 1;
        if self.open_bus_age >= OPEN_BUS_DECAY_CYCLES {
            self.open_bus = 0;
            self.open_bus_age = 0;
        }

        let rendering = self.registers.rendering_enabled();
        let visible_line = self.scanline < SCREEN_HEIGHT;
        let prerender_line = self.scanline == self.total_scanlines() - 1;

        if rendering && (visible_line || prerender_line) {
            self.tick_render_line(bus, visible_line, prerender_line);
        } else if visible_line && (1..=SCREEN_WIDTH).contains(&self.dot) {
            // Forced blank: the backdrop color (or the palette entry v points at) is emitted
            let color = if self.registers.v & 0x3FFF >= 0x3F00 {
                bus.read_palette(self.registers.v)
            } else {
                bus.read_palette(0x3F00)
            };
            self.set_pixel(self.dot - 1, self.scanline, color);
        }

        // VBlank flag set/clear
        if self.scanline == VBLANK_START_SCANLINE && self.dot == 1 {
            if !std::mem::take(&mut self.pending_nmi_suppression) {
                self.registers.vblank_flag = true;
            }
            self.frame_complete = true;
            self.frame_count += 1;
        }
        if prerender_line && self.dot == 1 {
            self.registers.vblank_flag = false;
            self.registers.sprite_0_hit = false;
            self.registers.sprite_overflow = false;
        }

        // Advance dot/scanline counters, with the NTSC odd-frame short pre-render line
        self.dot += 1;
        if self.dot == DOTS_PER_LINE
            || (prerender_line
                && self.timing_mode == TimingMode::Ntsc
                && self.odd_frame
                && rendering
                && self.dot == DOTS_PER_LINE - 1)
        {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline == self.total_scanlines() {
                self.scanline = 0;
                self.odd_frame = !self.odd_frame;
            }
        }
    }

    fn tick_render_line(&mut self, bus: &mut PpuBus<'_>, visible_line: bool, prerender_line: bool) {
        let dot = self.dot;

        // Background fetch pipeline on dots 1-256 and 321-336
        if (1..=256).contains(&dot) || (321..=336).contains(&dot) {
            if visible_line && (1..=256).contains(&dot) {
                self.render_pixel(bus);
            }
            self.bg.shift();

            match dot % 8 {
                1 => {
                    let address = 0x2000 | (self.registers.v & 0x0FFF);
                    self.bg.nametable_byte = bus.read(address);
                }
                3 => {
                    let v = self.registers.v;
                    let address =
                        0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
                    let attribute = bus.read(address);
                    let shift = (((v >> 4) & 0x04) | (v & 0x02)) as u8;
                    self.bg.attribute_byte = (attribute >> shift) & 0x03;
                }
                5 => {
                    let fine_y = (self.registers.v >> 12) & 0x07;
                    let address = self.registers.bg_pattern_table
                        + u16::from(self.bg.nametable_byte) * 16
                        + fine_y;
                    self.bg.pattern_low_byte = bus.read(address);
                }
                7 => {
                    let fine_y = (self.registers.v >> 12) & 0x07;
                    let address = self.registers.bg_pattern_table
                        + u16::from(self.bg.nametable_byte) * 16
                        + fine_y
                        + 8;
                    self.bg.pattern_high_byte = bus.read(address);
                }
                0 => {
                    self.bg.reload();
                    self.increment_coarse_x();
                    if dot == 256 {
                        self.increment_fine_y();
                    }
                }
                _ => {}
            }
        }

        if dot == 257 {
            // Copy horizontal bits of t into v
            self.registers.v = (self.registers.v & !0x041F) | (self.registers.t & 0x041F);
            if visible_line {
                self.evaluate_sprites();
            }
        }

        // Sprite pattern fetches occupy dots 257-320
        if dot == 320 && visible_line {
            self.fetch_sprite_patterns(bus);
        }

        if prerender_line && (280..=304).contains(&dot) {
            // Copy vertical bits of t into v
            self.registers.v = (self.registers.v & 0x041F) | (self.registers.t & !0x041F);
        }
    }

    fn render_pixel(&mut self, bus: &mut PpuBus<'_>) {
        let x = self.dot - 1;

        // Background pixel from the shifters
        let mut bg_color = 0_u8;
        let mut bg_palette = 0_u8;
        if self.registers.bg_enabled && (x >= 8 || self.registers.show_bg_left) {
            let shift = 15 - self.registers.fine_x;
            bg_color = (u8::from(self.bg.pattern_shift_high.bit(shift)) << 1)
                | u8::from(self.bg.pattern_shift_low.bit(shift));
            let attr_shift = 7 - self.registers.fine_x;
            bg_palette = (u8::from(self.bg.attribute_shift_high.bit(attr_shift)) << 1)
                | u8::from(self.bg.attribute_shift_low.bit(attr_shift));
        }

        // First matching sprite pixel
        let mut sprite_color = 0_u8;
        let mut sprite_palette = 0_u8;
        let mut sprite_behind_bg = false;
        let mut sprite_is_0 = false;
        if self.registers.sprites_enabled && (x >= 8 || self.registers.show_sprites_left) {
            for i in 0..self.sprite_count as usize {
                let sprite = self.secondary_oam[i];
                let offset = x.wrapping_sub(sprite.x.into());
                if offset >= 8 {
                    continue;
                }
                let shift = (if sprite.attributes.bit(6) { offset } else { 7 - offset }) as u8;
                let color = (u8::from(self.sprite_pattern_high[i].bit(shift)) << 1)
                    | u8::from(self.sprite_pattern_low[i].bit(shift));
                if color != 0 {
                    sprite_color = color;
                    sprite_palette = sprite.attributes & 0x03;
                    sprite_behind_bg = sprite.attributes.bit(5);
                    sprite_is_0 = sprite.is_sprite_0;
                    break;
                }
            }
        }

        if sprite_is_0 && bg_color != 0 && sprite_color != 0 && x != 255 {
            self.registers.sprite_0_hit = true;
        }

        let palette_address = match (bg_color, sprite_color) {
            (0, 0) => 0x3F00,
            (_, 0) => 0x3F00 | (u16::from(bg_palette) << 2) | u16::from(bg_color),
            (0, _) => 0x3F10 | (u16::from(sprite_palette) << 2) | u16::from(sprite_color),
            (_, _) => {
                if sprite_behind_bg {
                    0x3F00 | (u16::from(bg_palette) << 2) | u16::from(bg_color)
                } else {
                    0x3F10 | (u16::from(sprite_palette) << 2) | u16::from(sprite_color)
                }
            }
        };

        let mut color = bus.read_palette(palette_address);
        if self.registers.grayscale {
            color &= 0x30;
        }
        let scanline = self.scanline;
        self.set_pixel(x, scanline, color);
    }

    fn set_pixel(&mut self, x: u16, y: u16, color: u8) {
        self.frame_buffer[(y as usize) * (SCREEN_WIDTH as usize) + (x as usize)] = color;
    }

    /// Secondary OAM evaluation for the next scanline.
    fn evaluate_sprites(&mut self) {
        let sprite_height: u16 = if self.registers.tall_sprites { 16 } else { 8 };
        let line = self.scanline;

        self.sprite_count = 0;
        let mut overflow_candidates = 0_u8;
        for sprite_index in 0..64 {
            let base = sprite_index * 4;
            let y = u16::from(self.oam[base]);
            if !(y..y + sprite_height).contains(&line) {
                continue;
            }

            if self.sprite_count < 8 {
                self.secondary_oam[self.sprite_count as usize] = SpriteData {
                    y: self.oam[base],
                    tile: self.oam[base + 1],
                    attributes: self.oam[base + 2],
                    x: self.oam[base + 3],
                    is_sprite_0: sprite_index == 0,
                };
                self.sprite_count += 1;
            } else {
                overflow_candidates += 1;
            }
        }

        if overflow_candidates > 0 {
            self.registers.sprite_overflow = true;
        }
    }

    fn fetch_sprite_patterns(&mut self, bus: &mut PpuBus<'_>) {
        let sprite_height = if self.registers.tall_sprites { 16_u16 } else { 8 };
        for i in 0..8 {
            if i >= self.sprite_count as usize {
                // Dummy fetches of tile $FF keep the MMC2/MMC3 address-watching behavior alive
                let address = self.registers.sprite_pattern_table + 0xFF * 16;
                bus.read(address);
                bus.read(address + 8);
                self.sprite_pattern_low[i] = 0;
                self.sprite_pattern_high[i] = 0;
                continue;
            }

            let sprite = self.secondary_oam[i];
            let mut row = self.scanline - u16::from(sprite.y);
            if sprite.attributes.bit(7) {
                row = sprite_height - 1 - row;
            }

            let address = if sprite_height == 16 {
                let table = u16::from(sprite.tile & 0x01) * 0x1000;
                let tile = u16::from(sprite.tile & 0xFE) + u16::from(row >= 8);
                table + tile * 16 + (row & 0x07)
            } else {
                self.registers.sprite_pattern_table + u16::from(sprite.tile) * 16 + row
            };

            self.sprite_pattern_low[i] = bus.read(address);
            self.sprite_pattern_high[i] = bus.read(address + 8);
        }
    }
}

/// The 2C02 master palette as RGB888, indexed by the 6-bit color values in the frame buffer.
pub(crate) const PALETTE: [(u8, u8, u8); 64] = [
    (0x66, 0x66, 0x66), (0x00, 0x2A, 0x88), (0x14, 0x12, 0xA7), (0x3B, 0x00, 0xA4),
    (0x5C, 0x00, 0x7E), (0x6E, 0x00, 0x40), (0x6C, 0x06, 0x00), (0x56, 0x1D, 0x00),
    (0x33, 0x35, 0x00), (0x0B, 0x48, 0x00), (0x00, 0x52, 0x00), (0x00, 0x4F, 0x08),
    (0x00, 0x40, 0x4D), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xAD, 0xAD, 0xAD), (0x15, 0x5F, 0xD9), (0x42, 0x40, 0xFF), (0x75, 0x27, 0xFE),
    (0xA0, 0x1A, 0xCC), (0xB7, 0x1E, 0x7B), (0xB5, 0x31, 0x20), (0x99, 0x4E, 0x00),
    (0x6B, 0x6D, 0x00), (0x38, 0x87, 0x00), (0x0C, 0x93, 0x00), (0x00, 0x8F, 0x32),
    (0x00, 0x7C, 0x8D), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xFF, 0xFE, 0xFF), (0x64, 0xB0, 0xFF), (0x92, 0x90, 0xFF), (0xC6, 0x76, 0xFF),
    (0xF3, 0x6A, 0xFF), (0xFE, 0x6E, 0xCC), (0xFE, 0x81, 0x70), (0xEA, 0x9E, 0x22),
    (0xBC, 0xBE, 0x00), (0x88, 0xD8, 0x00), (0x5C, 0xE4, 0x30), (0x45, 0xE0, 0x82),
    (0x48, 0xCD, 0xDE), (0x4F, 0x4F, 0x4F), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xFF, 0xFE, 0xFF), (0xC0, 0xDF, 0xFF), (0xD3, 0xD2, 0xFF), (0xE8, 0xC8, 0xFF),
    (0xFB, 0xC2, 0xFF), (0xFE, 0xC4, 0xEA), (0xFE, 0xCC, 0xC5), (0xF7, 0xD8, 0xA5),
    (0xE4, 0xE5, 0x94), (0xCF, 0xEF, 0x96), (0xBD, 0xF4, 0xAB), (0xB3, 0xF3, 0xCC),
    (0xB5, 0xEB, 0xF2), (0xB8, 0xB8, 0xB8), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
];
