//! Build-time identity, hardware layout and runtime tunables of the adapter.

use crate::tx::CsmaParams;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/build_config.rs"));
}
pub use generated::{BCD_DEVICE, FW_VERSION, MANUFACTURER, USB_PID, USB_VID};

pub const PRODUCT: &str = "CC2531 USB WPAN Adapter";

/// The control endpoint.
pub const CONTROL_EP: u8 = 0;
/// Interrupt IN endpoint carrying one byte transmit status codes.
pub const STATUS_EP: u8 = 1;
/// Bulk IN endpoint carrying received PHY frames.
pub const RX_EP: u8 = 5;
/// The highest endpoint index the USB controller has.
pub const MAX_EP: u8 = 5;

/// Size of the EP0 FIFO.
pub const CONTROL_MAX_PACKET: u16 = 32;
pub const STATUS_MAX_PACKET: u16 = 8;
pub const RX_MAX_PACKET: u16 = 64;

pub const WPAN_INTERFACE: u8 = 0;
pub const DFU_INTERFACE: u8 = 1;
pub const INTERFACE_COUNT: u8 = 2;

/// Fixed locations in the general purpose RAM, used as DMA sources for replies that aren't
/// constant.
pub mod layout {
    /// Two byte endpoint status word.
    pub const STATUS_WORD: u16 = 0x1fc0;
    /// Current configuration value.
    pub const CONFIGURATION: u16 = 0x1fc2;
    /// The serial number string descriptor, rendered at init.
    pub const SERIAL_DESCRIPTOR: u16 = 0x1fd0;
}

/// Runtime tunables of the adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterConfig {
    /// CSMA-CA parameters used until the host sends `SET_CSMA`.
    pub csma: CsmaParams,
    /// Clear channel assessment threshold in dBm, relative to the RSSI offset.
    pub cca_threshold: i8,
    /// Let the radio acknowledge frames addressed to us.
    pub auto_ack: bool,
}
impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            csma: CsmaParams::DEFAULT,
            cca_threshold: -8,
            auto_ack: true,
        }
    }
}
