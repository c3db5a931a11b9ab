//! CPU and PPU bus wiring: address decoding, open bus, OAM DMA, and DMC fetch stalls

pub(crate) mod cartridge;

use crate::apu::ApuState;
use crate::input::InputState;
use crate::ppu::PpuState;
use bincode::{Decode, Encode};
use cartridge::Mapper;
use mos6502_emu::bus::BusInterface;
use retrocore_proc_macros::PartialClone;

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    pub(crate) ram: [u8; 2048],
    pub(crate) vram: [u8; 2048],
    pub(crate) palette_ram: [u8; 32],
    #[partial_clone(partial)]
    pub(crate) mapper: Mapper,
    pub(crate) ppu: PpuState,
    pub(crate) apu: ApuState,
    pub(crate) input: InputState,
    pub(crate) cpu_open_bus: u8,
    /// Set when the CPU writes $4014; the page to copy from
    pending_oam_dma: Option<u8>,
}

impl Bus {
    pub(crate) fn new(mapper: Mapper, ppu: PpuState, apu: ApuState) -> Self {
        Self {
            ram: [0; 2048],
            vram: [0; 2048],
            palette_ram: [0; 32],
            mapper,
            ppu,
            apu,
            input: InputState::default(),
            cpu_open_bus: 0,
            pending_oam_dma: None,
        }
    }

    pub(crate) fn take_pending_oam_dma(&mut self) -> Option<u8> {
        self.pending_oam_dma.take()
    }

    /// Advance the PPU one dot, giving it access to the mapper and VRAM.
    pub(crate) fn tick_ppu(&mut self) {
        let Bus { ppu, mapper, vram, palette_ram, .. } = self;
        let mut ppu_bus = PpuBus { mapper, vram, palette_ram };
        ppu.tick(&mut ppu_bus);
    }
}

fn palette_index(address: u16) -> usize {
    let mut index = (address & 0x1F) as usize;
    // $3F10/$3F14/$3F18/$3F1C mirror the backdrop entries
    if index >= 0x10 && index % 4 == 0 {
        index -= 0x10;
    }
    index
}

/// $3000-$3EFF mirrors the nametable region.
fn mirror_ppu_address(address: u16) -> u16 {
    let address = address & 0x3FFF;
    if (0x3000..0x3F00).contains(&address) { address - 0x1000 } else { address }
}

/// The PPU's view of the cartridge and nametable memory.
pub(crate) struct PpuBus<'a> {
    pub(crate) mapper: &'a mut Mapper,
    pub(crate) vram: &'a mut [u8; 2048],
    pub(crate) palette_ram: &'a mut [u8; 32],
}

impl PpuBus<'_> {
    pub(crate) fn read(&mut self, address: u16) -> u8 {
        let address = mirror_ppu_address(address);
        // MMC5 ExRAM/fill nametable modes bypass the plain VRAM mapping
        let value = self
            .mapper
            .read_nametable_override(address)
            .unwrap_or_else(|| self.mapper.read_ppu_address(address, self.vram));
        self.mapper.tick(address);
        value
    }

    pub(crate) fn write(&mut self, address: u16, value: u8) {
        let address = mirror_ppu_address(address);
        self.mapper.write_ppu_address(address, value, self.vram);
        self.mapper.tick(address);
    }

    pub(crate) fn read_palette(&mut self, address: u16) -> u8 {
        self.palette_ram[palette_index(address)]
    }

    pub(crate) fn write_palette(&mut self, address: u16, value: u8) {
        self.palette_ram[palette_index(address)] = value;
    }
}

impl BusInterface for Bus {
    fn read(&mut self, address: u16) -> u8 {
        let value = match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            0x2000..=0x3FFF => {
                let Bus { ppu, mapper, vram, palette_ram, .. } = &mut *self;
                let mut ppu_bus = PpuBus { mapper, vram, palette_ram };
                ppu.read_register(address, &mut ppu_bus)
            }
            0x4015 => {
                // APU status updates only the internal bus; open bus bit 5 is preserved
                (self.apu.read_status() & 0xDF) | (self.cpu_open_bus & 0x20)
            }
            0x4016 => (self.cpu_open_bus & 0xE0) | self.input.read_p1(),
            0x4017 => (self.cpu_open_bus & 0xE0) | self.input.read_p2(),
            0x4000..=0x401F => self.cpu_open_bus,
            0x4020..=0xFFFF => {
                let open_bus = self.cpu_open_bus;
                self.mapper.read_cpu_address(address, open_bus)
            }
        };

        // $4015 drives only the internal data bus; the external open bus value is unchanged
        if address != 0x4015 {
            self.cpu_open_bus = value;
        }
        value
    }

    fn write(&mut self, address: u16, value: u8) {
        self.cpu_open_bus = value;

        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => {
                let Bus { ppu, mapper, vram, palette_ram, .. } = &mut *self;
                let mut ppu_bus = PpuBus { mapper, vram, palette_ram };
                ppu.write_register(address, value, &mut ppu_bus);
            }
            0x4014 => {
                self.pending_oam_dma = Some(value);
            }
            0x4016 => self.input.write_strobe(value),
            0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.write_register(address, value),
            0x4018..=0x401F => {}
            0x4020..=0xFFFF => self.mapper.write_cpu_address(address, value),
        }
    }
}
