//! LNX cartridge images and the bank shifter

use bincode::{Decode, Encode};
use retrocore_common::frontend::PartialClone;
use retrocore_proc_macros::{FakeDecode, FakeEncode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LnxError {
    #[error("file is too small to be a Lynx image")]
    Truncated,
}

/// The 64-byte LNX header.
#[derive(Debug, Clone)]
pub struct LnxHeader {
    pub bank0_page_size: u16,
    pub bank1_page_size: u16,
    pub version: u16,
    pub name: String,
    pub rotation: u8,
}

impl LnxHeader {
    pub(crate) const LEN: usize = 64;
    const MAGIC: &'static [u8; 4] = b"LYNX";

    /// Parse the header, or `None` for headerless `.o` images.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN || &bytes[..4] != Self::MAGIC {
            return None;
        }

        let name_end = bytes[10..42].iter().position(|&b| b == 0).unwrap_or(32);
        Some(Self {
            bank0_page_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            bank1_page_size: u16::from_le_bytes([bytes[6], bytes[7]]),
            version: u16::from_le_bytes([bytes[8], bytes[9]]),
            name: String::from_utf8_lossy(&bytes[10..10 + name_end]).into_owned(),
            rotation: bytes[58],
        })
    }
}

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub(crate) struct CartData {
    pub(crate) bank0: Vec<u8>,
    pub(crate) bank1: Vec<u8>,
}

/// The cartridge shifter: an 8-bit page address strobed in through Mikey's IODAT lines plus
/// an 11-bit in-page counter that increments on each data read.
#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Cart {
    pub(crate) data: CartData,
    pub(crate) page_size: u16,
    shift_register: u8,
    counter: u16,
    last_strobe: bool,
}

impl Cart {
    pub(crate) fn create(bytes: &[u8]) -> Result<(Self, Option<LnxHeader>), LnxError> {
        let (header, data) = match LnxHeader::parse(bytes) {
            Some(header) => (Some(header), &bytes[LnxHeader::LEN..]),
            None => (None, bytes),
        };

        if data.is_empty() {
            return Err(LnxError::Truncated);
        }

        let page_size = header
            .as_ref()
            .map_or(1024, |header| header.bank0_page_size.max(256));
        let bank0_len = usize::from(page_size) * 256;

        let bank0 = data.get(..bank0_len.min(data.len())).unwrap_or(data).to_vec();
        let bank1 = data.get(bank0_len..).unwrap_or(&[]).to_vec();

        Ok((
            Self {
                data: CartData { bank0, bank1 },
                page_size,
                shift_register: 0,
                counter: 0,
                last_strobe: false,
            },
            header,
        ))
    }

    /// CART0 data read with post-increment of the in-page counter.
    pub(crate) fn read_bank0(&mut self) -> u8 {
        let address =
            usize::from(self.shift_register) * usize::from(self.page_size) + usize::from(self.counter);
        self.counter = (self.counter + 1) % self.page_size.max(1);
        self.data.bank0.get(address % self.data.bank0.len().max(1)).copied().unwrap_or(0xFF)
    }

    pub(crate) fn read_bank1(&mut self) -> u8 {
        let address =
            usize::from(self.shift_register) * usize::from(self.page_size) + usize::from(self.counter);
        self.counter = (self.counter + 1) % self.page_size.max(1);
        self.data.bank1.get(address % self.data.bank1.len().max(1)).copied().unwrap_or(0xFF)
    }

    /// IODAT-driven address shifter: data bit clocked on the strobe's rising edge.
    pub(crate) fn strobe(&mut self, data_bit: bool, strobe: bool) {
        if strobe && !self.last_strobe {
            self.shift_register = (self.shift_register << 1) | u8::from(data_bit);
            self.counter = 0;
        }
        self.last_strobe = strobe;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lnx_header() {
        let mut bytes = vec![0_u8; 64 + 1024];
        bytes[..4].copy_from_slice(b"LYNX");
        bytes[4] = 0x00;
        bytes[5] = 0x04; // bank0 page size 1024
        bytes[10..14].copy_from_slice(b"TEST");

        let header = LnxHeader::parse(&bytes).unwrap();
        assert_eq!(header.bank0_page_size, 1024);
        assert_eq!(header.name, "TEST");
    }

    #[test]
    fn headerless_o_files_load() {
        let bytes = vec![0xAB_u8; 2048];
        let (mut cart, header) = Cart::create(&bytes).unwrap();
        assert!(header.is_none());
        assert_eq!(cart.read_bank0(), 0xAB);
    }

    #[test]
    fn shifter_selects_page() {
        let mut bytes = vec![0_u8; 64 + 256 * 1024];
        bytes[..4].copy_from_slice(b"LYNX");
        bytes[4] = 0x00;
        bytes[5] = 0x04;
        bytes[64 + 1024 * 3] = 0x42; // page 3, offset 0

        let (mut cart, _) = Cart::create(&bytes).unwrap();
        // Shift in page number 3
        for bit in [false, false, false, false, false, false, true, true] {
            cart.strobe(bit, true);
            cart.strobe(bit, false);
        }
        assert_eq!(cart.read_bank0(), 0x42);
    }
}
