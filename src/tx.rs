//! Transmit pipeline.
//!
//! The host hands us a frame through the `TX` vendor request. Its data stage is copied straight
//! into the TX FIFO, after [TxPipeline::prepare] wrote the length byte. Once the status stage is
//! done, the frame is either sent immediately, or the CSP runs CSMA-CA for it. The outcome
//! arrives as a radio interrupt and is reported back to the host as a single byte on the status
//! endpoint.

use bitfield_struct::bitfield;
use heapless::Deque;
use macro_bits::serializable_enum;

use crate::{
    config::{STATUS_EP, STATUS_MAX_PACKET},
    csp::{self, CspCommand},
    regs::{bits, select_endpoint, InCsrHigh, InCsrLow, Reg, Registers, RfIrq1, T2MSel},
    WpanError, WpanResult,
};

/// Largest PHY frame the radio can send.
pub const MAX_FRAME_LEN: u16 = 127;
/// The radio appends the FCS on its own.
const FCS_LEN: u16 = 2;

/// How many status codes can wait for the status endpoint.
const STATUS_BACKLOG: usize = 4;

serializable_enum! {
    /// Transmit outcome, as reported on the status endpoint.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum TxStatus: u8 {
        Success => 0x00,
        /// CSMA-CA gave up.
        ChannelAccessFailure => 0xe1,
        /// The TX FIFO overflowed.
        TransactionOverflow => 0xf1,
        /// The TX FIFO underflowed.
        SystemError => 0xff
    }
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
/// CSMA-CA parameters, in the layout of `wValue` of `SET_CSMA`.
pub struct CsmaParams {
    /// Initial backoff exponent.
    #[bits(3)]
    pub min_be: u8,
    #[bits(1)]
    __: u8,
    /// The backoff exponent is not incremented beyond this.
    #[bits(3)]
    pub max_be: u8,
    #[bits(1)]
    __: u8,
    /// Number of retries after the first attempt.
    pub retries: u8,
}
impl CsmaParams {
    /// The defaults of IEEE 802.15.4.
    pub const DEFAULT: Self = Self::new().with_min_be(3).with_max_be(5).with_retries(4);

    pub const fn from_packed(packed: u16) -> Self {
        // Clear the unused bits, so the parameters compare equal to ones built from fields.
        Self::new()
            .with_min_be(Self::from_bits(packed).min_be())
            .with_max_be(Self::from_bits(packed).max_be())
            .with_retries(Self::from_bits(packed).retries())
    }
}

/// How a prepared frame is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxMode {
    /// Transmit right away.
    Immediate,
    /// Run CSMA-CA first.
    Csma,
}

/// Timer 2 runs from the undivided 32 MHz clock, with 16 us symbols.
const SYMBOL_PERIOD: u16 = 512;
/// Turnaround time (1 ms rounded up to symbols) plus the CCA time of 8 symbols.
const BACKOFF_PERIOD: u16 = (8 + 63) * SYMBOL_PERIOD;

serializable_enum! {
    /// Selects the register behind `T2M0` and `T2M1`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum TimerSelect: u8 {
        Timer => 0,
        Capture => 1,
        Period => 2,
        Compare1 => 3,
        Compare2 => 4
    }
}
serializable_enum! {
    /// Selects the register behind `T2MOVF0..2`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum OverflowSelect: u8 {
        Overflow => 0,
        Capture => 1,
        Period => 2,
        Compare1 => 3,
        Compare2 => 4
    }
}

fn timer_select<R: Registers>(hw: &mut R, timer: TimerSelect, overflow: OverflowSelect) {
    hw.write(
        Reg::T2MSel,
        T2MSel::new()
            .with_t2msel(timer.into_bits())
            .with_t2movfsel(overflow.into_bits())
            .into_bits(),
    );
}

/// Program the MAC timer with the backoff period, the largest overflow period and a compare
/// event shortly after each overflow.
pub fn setup_mac_timer<R: Registers>(hw: &mut R) {
    timer_select(hw, TimerSelect::Period, OverflowSelect::Period);
    let [lo, hi] = BACKOFF_PERIOD.to_le_bytes();
    hw.write(Reg::T2M0, lo);
    hw.write(Reg::T2M1, hi);
    hw.write(Reg::T2MOvf0, 0xff);
    hw.write(Reg::T2MOvf1, 0xff);
    hw.write(Reg::T2MOvf2, 0xff);

    timer_select(hw, TimerSelect::Timer, OverflowSelect::Compare1);
    hw.write(Reg::T2MOvf0, 100);
    hw.write(Reg::T2MOvf1, 0);
    hw.write(Reg::T2MOvf2, 0);
    timer_select(hw, TimerSelect::Timer, OverflowSelect::Overflow);
}

/// Clear the MAC timer and start it, so that backoffs are aligned to the start of CSMA-CA.
pub fn restart_mac_timer<R: Registers>(hw: &mut R) {
    hw.write(Reg::T2Ctrl, 0);
    timer_select(hw, TimerSelect::Timer, OverflowSelect::Overflow);
    for reg in [Reg::T2M0, Reg::T2M1, Reg::T2MOvf0, Reg::T2MOvf1, Reg::T2MOvf2] {
        hw.write(reg, 0);
    }
    hw.write(Reg::T2Ctrl, bits::T2CTRL_RUN);
}

/// The TX side of the adapter.
pub struct TxPipeline {
    csma: CsmaParams,
    /// The maximum backoff exponent of the program currently in the CSP.
    loaded_max_be: Option<u8>,
    /// A status byte sits in the endpoint, that the host hasn't fetched yet.
    status_in_flight: bool,
    backlog: Deque<TxStatus, STATUS_BACKLOG>,
}
impl TxPipeline {
    pub const fn new(csma: CsmaParams) -> Self {
        Self {
            csma,
            loaded_max_be: None,
            status_in_flight: false,
            backlog: Deque::new(),
        }
    }
    /// Configure the status endpoint, the radio's TX interrupts and the MAC timer, and load the
    /// CSMA-CA program.
    pub fn setup<R: Registers>(&mut self, hw: &mut R) {
        debug!("Setting up TX pipeline.");
        select_endpoint(hw, STATUS_EP);
        hw.write(
            Reg::UsbCsih,
            InCsrHigh::new()
                .with_in_dbl_buf(true)
                .with_enable(true)
                .into_bits(),
        );
        hw.write(Reg::UsbMaxi, (STATUS_MAX_PACKET / 8) as u8);
        hw.write(
            Reg::UsbCsil,
            InCsrLow::new().with_clr_data_tog(true).into_bits(),
        );
        // Both halves of the double buffer.
        for _ in 0..2 {
            hw.write(
                Reg::UsbCsil,
                InCsrLow::new().with_flush_packet(true).into_bits(),
            );
        }
        hw.modify(Reg::UsbIie, |value| value | (1 << STATUS_EP));
        self.status_in_flight = false;
        self.backlog.clear();

        hw.strobe(CspCommand::FlushTx);
        hw.write(Reg::RfIrqF1, 0);
        hw.write(
            Reg::RfIrqM1,
            RfIrq1::new()
                .with_txackdone(true)
                .with_txdone(true)
                .with_csp_manint(true)
                .into_bits(),
        );

        setup_mac_timer(hw);
        self.load_program(hw, self.csma.max_be());
    }
    fn load_program<R: Registers>(&mut self, hw: &mut R, max_be: u8) {
        csp::load_program(hw, &csp::csma_program(max_be));
        self.loaded_max_be = Some(max_be);
    }
    pub const fn csma_params(&self) -> CsmaParams {
        self.csma
    }
    /// Replace the CSMA-CA parameters with the ones packed into `packed`, and reload the program.
    pub fn set_csma_params<R: Registers>(&mut self, hw: &mut R, packed: u16) {
        self.csma = CsmaParams::from_packed(packed);
        debug!(
            "CSMA-CA parameters: min BE {} max BE {} retries {}",
            self.csma.min_be(),
            self.csma.max_be(),
            self.csma.retries()
        );
        self.load_program(hw, self.csma.max_be());
    }
    /// Flush the TX FIFO and write the length byte for a frame with `len` bytes of payload.
    ///
    /// The payload itself has to be written to `RFD` afterwards.
    pub fn prepare<R: Registers>(&mut self, hw: &mut R, len: u16) -> WpanResult<()> {
        if len > MAX_FRAME_LEN - FCS_LEN {
            warn!("Frame with {} bytes doesn't fit into the TX FIFO.", len);
            return Err(WpanError::FrameTooLong);
        }
        trace!("Preparing frame with {} bytes.", len);
        hw.strobe(CspCommand::FlushTx);
        hw.write(Reg::Rfd, (len + FCS_LEN) as u8);
        Ok(())
    }
    pub fn transmit_immediate<R: Registers>(&mut self, hw: &mut R) {
        trace!("Transmitting without CSMA-CA.");
        hw.strobe(CspCommand::TxOn);
    }
    /// Start CSMA-CA for the prepared frame.
    pub fn transmit_csma<R: Registers>(&mut self, hw: &mut R, params: CsmaParams) {
        trace!(
            "Transmitting with CSMA-CA, BE {}..{} retries {}.",
            params.min_be(),
            params.max_be(),
            params.retries()
        );
        if self.loaded_max_be != Some(params.max_be()) {
            self.load_program(hw, params.max_be());
        }
        csp::start(hw, 0, params.min_be(), params.retries());
        restart_mac_timer(hw);
    }
    pub fn transmit<R: Registers>(&mut self, hw: &mut R, mode: TxMode) {
        match mode {
            TxMode::Immediate => self.transmit_immediate(hw),
            TxMode::Csma => self.transmit_csma(hw, self.csma),
        }
    }
    /// Handle the TX class radio interrupts, which are already cleared.
    pub fn on_radio_event<R: Registers>(&mut self, hw: &mut R, flags: RfIrq1) {
        if flags.csp_manint() {
            debug!("CSMA-CA failed.");
            self.report(hw, TxStatus::ChannelAccessFailure);
        }
        if flags.txdone() {
            trace!("Transmission done.");
            self.report(hw, TxStatus::Success);
        }
        if flags.txackdone() {
            trace!("ACK sent.");
        }
    }
    /// Handle the status endpoint interrupt, which means the host fetched the last status.
    pub fn on_usb_event<R: Registers>(&mut self, hw: &mut R) {
        select_endpoint(hw, STATUS_EP);
        let csr = InCsrLow::from_bits(hw.read(Reg::UsbCsil));
        if csr.sent_stall() {
            error!("Status endpoint sent a stall.");
        }
        hw.write(Reg::UsbCsil, 0);
        self.status_in_flight = false;
        if let Some(status) = self.backlog.pop_front() {
            self.send_status(hw, status);
        }
    }
    /// Queue a status byte for the host.
    pub fn report<R: Registers>(&mut self, hw: &mut R, status: TxStatus) {
        if !self.status_in_flight {
            self.send_status(hw, status);
        } else if self.backlog.push_back(status).is_err() {
            error!("Dropping TX status {:?}, backlog full.", status);
        }
    }
    fn send_status<R: Registers>(&mut self, hw: &mut R, status: TxStatus) {
        trace!("Sending TX status {:#x}.", status.into_bits());
        hw.write(Reg::usb_fifo(STATUS_EP), status.into_bits());
        select_endpoint(hw, STATUS_EP);
        hw.write(
            Reg::UsbCsil,
            InCsrLow::new().with_inpkt_rdy(true).into_bits(),
        );
        self.status_in_flight = true;
    }
    /// Drop all pending status codes, as the host won't expect them after a bus reset.
    pub fn reset(&mut self) {
        self.status_in_flight = false;
        self.backlog.clear();
    }
    pub fn pending_status(&self) -> usize {
        self.backlog.len() + self.status_in_flight as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csma_params_from_packed() {
        let params = CsmaParams::from_packed(0x0c32);
        assert_eq!(params.min_be(), 2);
        assert_eq!(params.max_be(), 3);
        assert_eq!(params.retries(), 12);
    }
    #[test]
    fn csma_params_clamped_to_three_bits() {
        let params = CsmaParams::from_packed(0x00ff);
        assert_eq!(params.min_be(), 7);
        assert_eq!(params.max_be(), 7);
        assert_eq!(params.retries(), 0);
        assert_eq!(
            CsmaParams::from_packed(0x0453),
            CsmaParams::DEFAULT,
        );
    }
    #[test]
    fn status_codes() {
        assert_eq!(TxStatus::Success.into_bits(), 0x00);
        assert_eq!(TxStatus::ChannelAccessFailure.into_bits(), 0xe1);
        assert_eq!(TxStatus::TransactionOverflow.into_bits(), 0xf1);
        assert_eq!(TxStatus::SystemError.into_bits(), 0xff);
    }
}
