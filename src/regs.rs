//! Register map of the CC2531 and the capability traits, through which all hardware access
//! happens.
//!
//! Everything is addressed through the xdata space, in which the SFRs are mirrored at
//! `0x7080 + sfr`. Access is split into four capabilities, so that the logic on top of them can
//! run against a fake register file.

use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

use crate::{csp::CspCommand, dma::DmaDescriptor};

serializable_enum! {
    /// A register, with its xdata address as the discriminant.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum Reg: u16 {
        // USB controller
        UsbAddr => 0x6200,
        UsbPow => 0x6201,
        UsbIif => 0x6202,
        /// Reserved, always reads as zero. Used as a fixed DMA source for zero replies.
        UsbZero => 0x6203,
        UsbOif => 0x6204,
        UsbCif => 0x6206,
        UsbIie => 0x6207,
        UsbOie => 0x6209,
        UsbCie => 0x620b,
        UsbFrml => 0x620c,
        UsbFrmh => 0x620d,
        UsbIndex => 0x620e,
        UsbCtrl => 0x620f,
        // Banked by `UsbIndex`.
        UsbMaxi => 0x6210,
        /// `USBCS0` when EP0 is selected.
        UsbCsil => 0x6211,
        UsbCsih => 0x6212,
        UsbMaxo => 0x6213,
        UsbCsol => 0x6214,
        UsbCsoh => 0x6215,
        /// `USBCNT0` when EP0 is selected.
        UsbCntl => 0x6216,
        UsbCnth => 0x6217,
        UsbF0 => 0x6220,
        UsbF1 => 0x6222,
        UsbF2 => 0x6224,
        UsbF3 => 0x6226,
        UsbF4 => 0x6228,
        UsbF5 => 0x622a,

        // Radio
        ExtAddr0 => 0x616a,
        ExtAddr1 => 0x616b,
        ExtAddr2 => 0x616c,
        ExtAddr3 => 0x616d,
        ExtAddr4 => 0x616e,
        ExtAddr5 => 0x616f,
        ExtAddr6 => 0x6170,
        ExtAddr7 => 0x6171,
        FrmCtrl0 => 0x6189,
        FsmStat0 => 0x6191,
        FifopCtrl => 0x6194,
        CcaCtrl0 => 0x6196,
        RfIrqM0 => 0x61a3,
        RfIrqM1 => 0x61a4,
        RfErrM => 0x61a5,
        FsCal1 => 0x61af,
        AgcCtrl1 => 0x61b2,
        CspX => 0x61c2,
        CspY => 0x61c3,
        CspZ => 0x61c4,
        TxFiltCfg => 0x61fa,

        // SFRs
        Tcon => 0x7088,
        P2Ifg => 0x708b,
        RfIrqF1 => 0x7091,
        T2Ctrl => 0x7094,
        Ien2 => 0x709a,
        S1Con => 0x709b,
        T2M0 => 0x70a2,
        T2M1 => 0x70a3,
        T2MOvf0 => 0x70a4,
        T2MOvf1 => 0x70a5,
        T2MOvf2 => 0x70a6,
        Ien0 => 0x70a8,
        P2Ien => 0x70ac,
        RfErrF => 0x70bf,
        T2MSel => 0x70c3,
        Rfd => 0x70d9,
        Rfst => 0x70e1,
        Ircon2 => 0x70e8,
        RfIrqF0 => 0x70e9
    }
}
impl Reg {
    pub const USB_CS0: Self = Self::UsbCsil;
    pub const USB_CNT0: Self = Self::UsbCntl;

    /// The FIFO register of the endpoint.
    pub const fn usb_fifo(endpoint: u8) -> Self {
        match endpoint {
            0 => Self::UsbF0,
            1 => Self::UsbF1,
            2 => Self::UsbF2,
            3 => Self::UsbF3,
            4 => Self::UsbF4,
            _ => Self::UsbF5,
        }
    }
    /// The n-th byte of the extended (IEEE) address.
    pub const fn ext_addr(n: usize) -> Self {
        match n {
            0 => Self::ExtAddr0,
            1 => Self::ExtAddr1,
            2 => Self::ExtAddr2,
            3 => Self::ExtAddr3,
            4 => Self::ExtAddr4,
            5 => Self::ExtAddr5,
            6 => Self::ExtAddr6,
            _ => Self::ExtAddr7,
        }
    }
}

#[bitfield(u8)]
/// `USBCS0`
pub struct Cs0 {
    pub outpkt_rdy: bool,
    pub inpkt_rdy: bool,
    pub sent_stall: bool,
    pub data_end: bool,
    pub setup_end: bool,
    pub send_stall: bool,
    pub clr_outpkt_rdy: bool,
    pub clr_setup_end: bool,
}

#[bitfield(u8)]
/// `USBCSIL`
pub struct InCsrLow {
    pub inpkt_rdy: bool,
    pub pkt_present: bool,
    pub underrun: bool,
    pub flush_packet: bool,
    pub send_stall: bool,
    pub sent_stall: bool,
    pub clr_data_tog: bool,
    #[bits(1)]
    __: u8,
}

#[bitfield(u8)]
/// `USBCSIH`
pub struct InCsrHigh {
    pub in_dbl_buf: bool,
    #[bits(1)]
    __: u8,
    pub enable: bool,
    pub force_data_tog: bool,
    #[bits(2)]
    __: u8,
    pub iso: bool,
    pub autoset: bool,
}

#[bitfield(u8)]
/// `USBCSOL`
pub struct OutCsrLow {
    pub outpkt_rdy: bool,
    pub overrun: bool,
    pub data_error: bool,
    pub fifo_full: bool,
    pub flush_packet: bool,
    pub send_stall: bool,
    pub sent_stall: bool,
    pub clr_data_tog: bool,
}

#[bitfield(u8)]
/// `USBCIF` and `USBCIE`
pub struct UsbCommon {
    pub suspend: bool,
    pub resume: bool,
    pub reset: bool,
    pub sof: bool,
    #[bits(4)]
    __: u8,
}

#[bitfield(u8)]
/// `USBCTRL`
pub struct UsbCtrl {
    pub usb_en: bool,
    pub pll_en: bool,
    #[bits(5)]
    __: u8,
    pub pll_locked: bool,
}

#[bitfield(u8)]
/// `USBPOW`
pub struct UsbPow {
    pub suspend_en: bool,
    pub suspend: bool,
    pub resume: bool,
    pub rst: bool,
    #[bits(3)]
    __: u8,
    pub iso_wait_sof: bool,
}

#[bitfield(u8)]
/// `RFIRQF0` and `RFIRQM0`
pub struct RfIrq0 {
    pub act_unused: bool,
    pub sfd: bool,
    pub fifop: bool,
    pub src_match_done: bool,
    pub src_match_found: bool,
    pub frame_accepted: bool,
    pub rxpkt_done: bool,
    pub rx_mask_zero: bool,
}

#[bitfield(u8)]
/// `RFIRQF1` and `RFIRQM1`
pub struct RfIrq1 {
    pub txackdone: bool,
    pub txdone: bool,
    pub rf_idle: bool,
    pub csp_manint: bool,
    pub csp_stop: bool,
    pub csp_wait: bool,
    #[bits(2)]
    __: u8,
}

#[bitfield(u8)]
/// `RFERRF` and `RFERRM`
pub struct RfErr {
    pub nlock: bool,
    pub rxabo: bool,
    pub rxoverf: bool,
    pub rxunderf: bool,
    pub txoverf: bool,
    pub txunderf: bool,
    pub strobeerr: bool,
    #[bits(1)]
    __: u8,
}

#[bitfield(u8)]
/// `FRMCTRL0`
pub struct FrmCtrl0 {
    #[bits(2)]
    pub tx_mode: u8,
    #[bits(2)]
    pub rx_mode: u8,
    pub energy_scan: bool,
    pub autoack: bool,
    pub autocrc: bool,
    pub append_data_mode: bool,
}

#[bitfield(u8)]
/// `T2MSEL`
pub struct T2MSel {
    #[bits(3)]
    pub t2msel: u8,
    #[bits(1)]
    __: u8,
    #[bits(3)]
    pub t2movfsel: u8,
    #[bits(1)]
    __: u8,
}

/// Bits of the interrupt enable and flag SFRs, that we touch.
pub mod bits {
    /// `IEN0.RFERRIE`
    pub const IEN0_RFERRIE: u8 = 1 << 0;
    /// `IEN2.RFIE`
    pub const IEN2_RFIE: u8 = 1 << 0;
    /// `IEN2.P2IE`
    pub const IEN2_P2IE: u8 = 1 << 1;
    /// `TCON.RFERRIF`
    pub const TCON_RFERRIF: u8 = 1 << 1;
    /// `IRCON2.P2IF`
    pub const IRCON2_P2IF: u8 = 1 << 0;
    /// `P2IFG.DPIF` and `P2IEN.DPIEN`, the D+ pin change used for resume detection.
    pub const P2_DP: u8 = 1 << 5;
    /// `T2CTRL.RUN`
    pub const T2CTRL_RUN: u8 = 1 << 0;
    /// Mask of `FSMSTAT0.FSM_FFCTRL_STATE`.
    pub const FSMSTAT0_STATE: u8 = 0x3f;
}

/// Byte wide access to the register space.
pub trait Registers {
    fn read(&mut self, reg: Reg) -> u8;
    fn write(&mut self, reg: Reg, value: u8);

    /// Read, modify and write back a register.
    ///
    /// Don't use this on registers, which are cleared on read.
    fn modify(&mut self, reg: Reg, f: impl FnOnce(u8) -> u8) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
    /// Issue an immediate command strobe to the radio.
    fn strobe(&mut self, command: CspCommand) {
        self.write(Reg::Rfst, command.into_bits());
    }
}

/// Block access to the general purpose xdata RAM.
pub trait Memory {
    fn xdata_write(&mut self, address: u16, data: &[u8]);
}

/// The DMA channel used for control transfer data stages.
pub trait DmaChannel {
    /// Load the descriptor into the channel. The channel must be disarmed.
    fn configure(&mut self, descriptor: &DmaDescriptor);
    fn arm(&mut self);
    fn disarm(&mut self);
    /// The channel disarms itself, once the whole length has been transferred.
    fn is_armed(&mut self) -> bool;
    /// Move one byte.
    fn trigger(&mut self);
}

/// Board level services, which aren't expressible as register accesses.
pub trait Platform {
    /// The IEEE extended address from the information page, least significant byte first.
    fn ieee_address(&mut self) -> [u8; 8];
    /// Connect or disconnect the D+ pull-up.
    fn usb_pullup(&mut self, enabled: bool);
    /// Hand control to the DFU bootloader. On hardware this doesn't return.
    fn enter_bootloader(&mut self);
    /// Enter power mode 1 and return after the next interrupt woke us up.
    ///
    /// This is called with interrupts disabled. Implementations re-enable them atomically with
    /// the sleep instruction, so the handler of the waking interrupt runs before this returns.
    /// The power mode registers are global, so no instance is needed.
    fn enter_low_power();
    fn feed_watchdog(&mut self);
}

/// Everything the adapter needs from the hardware.
pub trait Hardware: Registers + Memory + DmaChannel + Platform {}
impl<T: Registers + Memory + DmaChannel + Platform> Hardware for T {}

/// Select an endpoint for the banked USB registers.
pub(crate) fn select_endpoint<R: Registers>(hw: &mut R, endpoint: u8) {
    hw.write(Reg::UsbIndex, endpoint);
}
