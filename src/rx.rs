//! Receive pipeline.
//!
//! The radio raises `FIFOP` once a complete frame is in the RX FIFO. We then copy the frame into
//! the FIFO of the RX endpoint and mask `FIFOP`, until the USB controller reports that the packet
//! left. This is the only flow control between the radio and the host, a slow host makes frames
//! pile up in the RX FIFO, where the radio drops them once it's full.

use crate::{
    config::{RX_EP, RX_MAX_PACKET},
    csp::CspCommand,
    regs::{select_endpoint, InCsrHigh, InCsrLow, Reg, Registers, RfIrq0},
};

/// The length byte has a reserved top bit.
const LENGTH_MASK: u8 = 0x7f;
/// Raise `FIFOP` only for complete frames.
const FIFOP_THRESHOLD: u8 = 127;

/// The RX side of the adapter.
#[derive(Debug, Default)]
pub struct RxPipeline {
    frames: u32,
}
impl RxPipeline {
    pub const fn new() -> Self {
        Self { frames: 0 }
    }
    /// Arm the RX endpoint, flush the RX FIFO and enable the frame interrupt.
    pub fn setup<R: Registers>(&mut self, hw: &mut R) {
        debug!("Setting up RX pipeline.");
        select_endpoint(hw, RX_EP);
        hw.write(Reg::UsbMaxi, (RX_MAX_PACKET / 8) as u8);
        hw.write(
            Reg::UsbCsil,
            InCsrLow::new().with_clr_data_tog(true).into_bits(),
        );
        for _ in 0..2 {
            hw.write(
                Reg::UsbCsil,
                InCsrLow::new().with_flush_packet(true).into_bits(),
            );
        }
        hw.write(
            Reg::UsbCsih,
            InCsrHigh::new()
                .with_autoset(true)
                .with_in_dbl_buf(true)
                .with_enable(true)
                .into_bits(),
        );
        hw.modify(Reg::UsbIie, |value| value | (1 << RX_EP));

        hw.strobe(CspCommand::FlushRx);
        hw.strobe(CspCommand::FlushRx);
        hw.write(Reg::RfIrqF0, 0);
        hw.write(Reg::FifopCtrl, FIFOP_THRESHOLD);

        Self::enable_frame_interrupt(hw);
    }
    fn enable_frame_interrupt<R: Registers>(hw: &mut R) {
        hw.write(Reg::RfIrqM0, RfIrq0::new().with_fifop(true).into_bits());
    }
    fn disable_frame_interrupt<R: Registers>(hw: &mut R) {
        hw.write(Reg::RfIrqM0, 0);
    }
    /// Handle the RX class radio interrupts, which are already cleared.
    pub fn on_radio_event<R: Registers>(&mut self, hw: &mut R, flags: RfIrq0) {
        if !flags.fifop() {
            return;
        }
        let len = hw.read(Reg::Rfd) & LENGTH_MASK;
        if len == 0 {
            warn!("Discarding empty frame.");
            return;
        }
        trace!("Received frame with {} bytes.", len);
        let fifo = Reg::usb_fifo(RX_EP);
        for _ in 0..len {
            let byte = hw.read(Reg::Rfd);
            hw.write(fifo, byte);
        }
        select_endpoint(hw, RX_EP);
        hw.write(
            Reg::UsbCsil,
            InCsrLow::new().with_inpkt_rdy(true).into_bits(),
        );
        self.frames = self.frames.wrapping_add(1);
        // Wait for the packet to leave, before draining the next frame.
        Self::disable_frame_interrupt(hw);
    }
    /// Handle the RX endpoint interrupt.
    pub fn on_usb_event<R: Registers>(&mut self, hw: &mut R) {
        select_endpoint(hw, RX_EP);
        let csr = hw.read(Reg::UsbCsil);
        if InCsrLow::from_bits(csr).sent_stall() {
            hw.write(Reg::UsbCsil, 0);
            error!("RX endpoint sent a stall.");
        } else if csr == 0 {
            Self::enable_frame_interrupt(hw);
        }
    }
    /// Number of frames passed to the host so far.
    pub const fn frames(&self) -> u32 {
        self.frames
    }
}
