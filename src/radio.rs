//! Radio setup and the two radio interrupt vectors.

use crate::{
    config::AdapterConfig,
    csp::CspCommand,
    regs::{bits, FrmCtrl0, Reg, Registers, RfErr, RfIrq0, RfIrq1},
    rx::RxPipeline,
    tx::{TxPipeline, TxStatus},
};

/// `AGCCTRL1.AGC_REF`, which needs changing from its reset value.
const AGC_REFERENCE: u8 = 0x15;
/// `TXFILTCFG.FC`, which needs changing from its reset value.
const TX_FILTER: u8 = 0x09;

/// Bring the radio into its operating configuration and enable both radio interrupts.
///
/// `ieee_address` is least significant byte first.
pub fn setup<R: Registers>(hw: &mut R, config: &AdapterConfig, ieee_address: [u8; 8]) {
    debug!("Setting up radio.");
    hw.write(Reg::AgcCtrl1, AGC_REFERENCE);
    hw.write(Reg::TxFiltCfg, TX_FILTER);
    // VCO current is in the two low bits.
    hw.modify(Reg::FsCal1, |value| value & !0x3);

    hw.write(Reg::CcaCtrl0, config.cca_threshold as u8);
    hw.write(
        Reg::RfErrM,
        RfErr::new()
            .with_nlock(true)
            .with_rxabo(true)
            .with_rxoverf(true)
            .with_rxunderf(true)
            .with_txoverf(true)
            .with_txunderf(true)
            .with_strobeerr(true)
            .into_bits(),
    );
    hw.modify(Reg::FrmCtrl0, |value| {
        FrmCtrl0::from_bits(value)
            .with_autoack(config.auto_ack)
            .into_bits()
    });
    for (i, byte) in ieee_address.into_iter().enumerate() {
        hw.write(Reg::ext_addr(i), byte);
    }

    hw.write(Reg::RfErrF, 0);
    hw.write(Reg::S1Con, 0);
    hw.modify(Reg::Ien2, |value| value | bits::IEN2_RFIE);
    hw.modify(Reg::Ien0, |value| value | bits::IEN0_RFERRIE);
}

/// Turn the radio off, if it's active, and flush the RX FIFO.
pub fn stop<R: Registers>(hw: &mut R) {
    debug!("Stopping radio.");
    if hw.read(Reg::FsmStat0) & bits::FSMSTAT0_STATE != 0 {
        hw.strobe(CspCommand::RfOff);
    }
    hw.strobe(CspCommand::FlushRx);
}

/// The radio error vector.
///
/// Every error gets its recovery strobes. Errors on the TX side are also reported to the host,
/// since it is waiting for a status for the frame, that was lost.
pub fn on_error<R: Registers>(hw: &mut R, tx: &mut TxPipeline) {
    hw.modify(Reg::Tcon, |value| value & !bits::TCON_RFERRIF);
    let errors = RfErr::from_bits(hw.read(Reg::RfErrF));
    hw.write(Reg::RfErrF, 0);

    if errors.nlock() {
        // The synthesizer lost lock, which only a receiver restart clears.
        hw.strobe(CspCommand::RxOn);
        error!("Synthesizer lost lock.");
    }
    if errors.rxabo() {
        hw.strobe(CspCommand::FlushRx);
        error!("RX aborted.");
    }
    if errors.rxoverf() {
        hw.strobe(CspCommand::FlushRx);
        hw.strobe(CspCommand::RxOn);
        error!("RX FIFO overflow.");
    }
    if errors.rxunderf() {
        hw.strobe(CspCommand::FlushRx);
        hw.strobe(CspCommand::RxOn);
        error!("RX FIFO underflow.");
    }
    if errors.txoverf() {
        hw.strobe(CspCommand::FlushTx);
        tx.report(hw, TxStatus::TransactionOverflow);
        error!("TX FIFO overflow.");
    }
    if errors.txunderf() {
        hw.strobe(CspCommand::FlushTx);
        tx.report(hw, TxStatus::SystemError);
        error!("TX FIFO underflow.");
    }
    if errors.strobeerr() {
        // Strobes the radio can't process in its current state, like RFOFF while off.
        error!("Strobe error.");
    }
}

/// The RF event vector.
///
/// Each flag register is cleared as a whole before its flags are handled.
pub fn on_event<R: Registers>(hw: &mut R, tx: &mut TxPipeline, rx: &mut RxPipeline) {
    hw.write(Reg::S1Con, 0);

    let flags = hw.read(Reg::RfIrqF1) & hw.read(Reg::RfIrqM1);
    if flags != 0 {
        hw.write(Reg::RfIrqF1, 0);
        tx.on_radio_event(hw, RfIrq1::from_bits(flags));
    }

    let flags = hw.read(Reg::RfIrqF0) & hw.read(Reg::RfIrqM0);
    if flags != 0 {
        hw.write(Reg::RfIrqF0, 0);
        rx.on_radio_event(hw, RfIrq0::from_bits(flags));
    }
}
