//! # `cc2531-wpan`
//! This is the firmware core of a USB to IEEE 802.15.4 adapter, built around the TI CC2531.
//! The host driver sends and receives raw PHY frames and configures the radio through vendor
//! requests, while all MAC semantics stay on the host.
//! ## Hardware overview
//! This chapter will give a short overview of how the USB controller and the radio are tied
//! together.
//!
//! ### Control transfers
//! Everything the host wants from us arrives on the control endpoint. The setup packet is read
//! from the EP0 FIFO, and its data stage, if any, is moved by the DMA channel in packets of at most
//! 32 bytes, one per interrupt. The vendor requests simply point the DMA channel at xdata or at a
//! FIFO register, which gives the host raw access to the radio registers and FIFOs. Frames to be
//! sent are written straight into the TX FIFO this way. See [usb::control] for the state machine.
//!
//! ### Transmit (TX)
//! Once the data stage of a `TX` request is complete, the frame is sent either immediately or with
//! CSMA-CA. CSMA-CA runs entirely on the command strobe processor (see [csp]), which raises
//! either `TXDONE` or `CSP_MANINT`. Either way, the outcome ends up as one byte on the interrupt
//! endpoint.
//!
//! ### Receive (RX)
//! Once a complete frame is in the RX FIFO, it is copied into the FIFO of the bulk endpoint byte
//! by byte. The frame interrupt stays masked, until the USB controller reports, that the packet
//! was fetched by the host.
//!
//! ### Power
//! On USB suspend the PLL is turned off and the main loop is asked to enter PM1. A change on D+
//! wakes us up again, after which the PLL is turned back on.

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

mod adapter;
pub mod config;
pub mod csp;
pub mod dma;
mod error;
pub mod radio;
pub mod regs;
pub mod rx;
mod sync;
pub mod tx;
pub mod usb;

pub use adapter::{Adapter, SharedAdapter};
pub use config::AdapterConfig;
pub use error::{WpanError, WpanResult};
pub use regs::{DmaChannel, Hardware, Memory, Platform, Reg, Registers};
pub use sync::SleepRequest;
pub use usb::control::{ControlState, Deferred};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}
