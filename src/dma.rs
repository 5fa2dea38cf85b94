//! DMA descriptors for control transfer data stages.
//!
//! There is only one channel in use, which is owned by the control endpoint. Each data stage
//! programs it with a single descriptor, which is then moved forward one byte per trigger, until
//! the channel disarms itself.

use bitfield_struct::bitfield;

/// How the address of one side advances after each byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    /// The address stays the same, as required for FIFO registers.
    Fixed,
    /// The address is incremented by one.
    Increment,
}
impl AddressMode {
    const fn into_bits(self) -> u8 {
        match self {
            Self::Fixed => 0,
            Self::Increment => 1,
        }
    }
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Fixed,
            _ => Self::Increment,
        }
    }
}

/// The source of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaSource {
    /// An xdata address, which may be RAM or a register.
    Xdata(u16),
    /// Constant data in flash.
    Flash(&'static [u8]),
}

#[bitfield(u16)]
/// The mode bytes of a CC253x DMA descriptor, with byte 6 in the low half.
pub struct DmaConfig {
    #[bits(5)]
    pub trigger: u8,
    #[bits(2)]
    pub transfer_mode: u8,
    pub word_size: bool,
    #[bits(2)]
    pub priority: u8,
    pub m8: bool,
    pub irq_mask: bool,
    #[bits(2)]
    pub dst_inc: AddressMode,
    #[bits(2)]
    pub src_inc: AddressMode,
}
impl DmaConfig {
    /// Software triggered, one byte per trigger, high priority, no interrupt.
    pub const MANUAL_HIGH_PRIORITY: Self = Self::new().with_priority(2);
}

/// A single DMA transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaDescriptor {
    pub src: DmaSource,
    pub src_mode: AddressMode,
    pub dst: u16,
    pub dst_mode: AddressMode,
    pub len: u16,
}
impl DmaDescriptor {
    /// A transfer into the FIFO at `fifo`, as used for IN data stages.
    pub const fn to_fifo(src: DmaSource, src_mode: AddressMode, fifo: u16, len: u16) -> Self {
        Self {
            src,
            src_mode,
            dst: fifo,
            dst_mode: AddressMode::Fixed,
            len,
        }
    }
    /// A transfer out of the FIFO at `fifo`, as used for OUT data stages.
    pub const fn from_fifo(fifo: u16, dst: u16, dst_mode: AddressMode, len: u16) -> Self {
        Self {
            src: DmaSource::Xdata(fifo),
            src_mode: AddressMode::Fixed,
            dst,
            dst_mode,
            len,
        }
    }
    pub const fn config(&self) -> DmaConfig {
        let src_mode = match self.src {
            DmaSource::Flash(_) => AddressMode::Increment,
            DmaSource::Xdata(_) => self.src_mode,
        };
        DmaConfig::MANUAL_HIGH_PRIORITY
            .with_src_inc(src_mode)
            .with_dst_inc(self.dst_mode)
    }
    /// The descriptor in the memory layout the DMA controller expects.
    ///
    /// Flash sources have to be mapped into xdata by the caller, `flash_address` is the address
    /// of the first byte.
    pub fn to_bytes(&self, flash_address: u16) -> [u8; 8] {
        let src = match self.src {
            DmaSource::Xdata(address) => address,
            DmaSource::Flash(_) => flash_address,
        };
        let config = self.config().into_bits();
        [
            (src >> 8) as u8,
            src as u8,
            (self.dst >> 8) as u8,
            self.dst as u8,
            // VLEN is zero, so the length is always used.
            (self.len >> 8) as u8 & 0x1f,
            self.len as u8,
            config as u8,
            (config >> 8) as u8,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_layout() {
        let descriptor = DmaDescriptor::to_fifo(
            DmaSource::Xdata(0x1fc0),
            AddressMode::Increment,
            0x6220,
            2,
        );
        assert_eq!(
            descriptor.to_bytes(0),
            [0x1f, 0xc0, 0x62, 0x20, 0x00, 0x02, 0x00, 0x42]
        );

        let descriptor = DmaDescriptor::from_fifo(0x70d9, 0x0100, AddressMode::Fixed, 300);
        assert_eq!(
            descriptor.to_bytes(0),
            [0x70, 0xd9, 0x01, 0x00, 0x01, 0x2c, 0x00, 0x02]
        );
    }
    #[test]
    fn flash_source_always_increments() {
        static DATA: [u8; 3] = [1, 2, 3];
        let descriptor =
            DmaDescriptor::to_fifo(DmaSource::Flash(&DATA), AddressMode::Fixed, 0x6220, 3);
        assert_eq!(descriptor.config().src_inc(), AddressMode::Increment);
        assert_eq!(descriptor.to_bytes(0x8123)[..2], [0x81, 0x23]);
    }
}
