use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum InterruptLine {
    High,
    Low,
}

pub trait BusInterface {
    /// Read a byte from the given memory address.
    fn read_memory(&mut self, address: u16) -> u8;

    /// Write the given byte to the given memory address.
    fn write_memory(&mut self, address: u16, value: u8);

    /// Read a byte from the given I/O port. Most hardware only decodes the lower 8 bits.
    fn read_io(&mut self, address: u16) -> u8;

    /// Write the given byte to the given I/O port.
    fn write_io(&mut self, address: u16, value: u8);

    /// Poll the NMI interrupt line; the CPU latches the High-to-Low edge.
    fn nmi(&self) -> InterruptLine;

    /// Poll the INT interrupt line; level-sensitive, sampled at instruction boundaries.
    fn int(&self) -> InterruptLine;

    /// Value driven onto the data bus during an IM 0 / IM 2 interrupt acknowledge cycle.
    fn interrupt_vector(&self) -> u8 {
        0xFF
    }
}
