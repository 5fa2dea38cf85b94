//! The USB interrupt vector.
//!
//! All USB flag registers are cleared on read, so each is read exactly once per interrupt, and
//! the flags are acted upon in a fixed order: bus events first, then the IN endpoints, then the
//! OUT endpoints and finally the D+ wake-up.

use macro_bits::{bit, check_bit};

use crate::{
    adapter::Adapter,
    config::{CONTROL_EP, RX_EP, STATUS_EP},
    radio,
    regs::{bits, Hardware, Reg, Registers, UsbCommon, UsbPow},
    usb,
};

impl<H: Hardware> Adapter<H> {
    /// The USB interrupt vector, which is shared with port 2.
    pub fn on_usb_interrupt(&mut self) {
        self.hw
            .modify(Reg::Ircon2, |value| value & !bits::IRCON2_P2IF);

        let common = UsbCommon::from_bits(self.hw.read(Reg::UsbCif));
        if common.reset() {
            self.on_bus_reset();
        }
        if common.suspend() {
            self.on_suspend();
        }

        let in_flags = self.hw.read(Reg::UsbIif);
        if check_bit!(in_flags, bit!(CONTROL_EP)) {
            if let Some(action) = self.control.on_interrupt(&mut self.hw, &mut self.tx, &mut self.rx)
            {
                self.run_deferred(action);
            }
        }
        if check_bit!(in_flags, bit!(RX_EP)) {
            self.rx.on_usb_event(&mut self.hw);
        }
        if check_bit!(in_flags, bit!(STATUS_EP)) {
            self.tx.on_usb_event(&mut self.hw);
        }

        let out_flags = self.hw.read(Reg::UsbOif);
        if out_flags != 0 {
            warn!("Unexpected OUT endpoint flags {:#x}.", out_flags);
        }

        if self.hw.read(Reg::P2Ifg) & bits::P2_DP != 0 {
            self.on_resume();
        }
        self.hw.write(Reg::P2Ifg, 0);
    }

    fn on_bus_reset(&mut self) {
        info!("USB bus reset.");
        radio::stop(&mut self.hw);
        self.hw.write(
            Reg::UsbCie,
            UsbCommon::new().with_reset(true).with_suspend(true).into_bits(),
        );
        self.hw
            .write(Reg::UsbPow, UsbPow::new().with_suspend_en(true).into_bits());
        self.control.reset(&mut self.hw);
        self.tx.reset();
    }
    fn on_suspend(&mut self) {
        info!("USB suspend.");
        usb::disable_pll(&mut self.hw);
        self.sleep.request();
    }
    fn on_resume(&mut self) {
        info!("USB resume.");
        usb::enable_pll(&mut self.hw);
    }
}
