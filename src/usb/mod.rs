//! The USB side of the adapter.

pub mod control;
pub mod descriptor;
mod events;
pub mod request;

use crate::regs::{bits, Reg, Registers, UsbCtrl};

/// Enable the USB PLL and wait for it to lock.
pub fn enable_pll<R: Registers>(hw: &mut R) {
    info!("Enabling USB PLL.");
    hw.write(
        Reg::UsbCtrl,
        UsbCtrl::new().with_usb_en(true).with_pll_en(true).into_bits(),
    );
    while !UsbCtrl::from_bits(hw.read(Reg::UsbCtrl)).pll_locked() {
        core::hint::spin_loop();
    }
}

/// Disable the USB PLL, keeping the controller enabled, and wait for it to unlock.
pub fn disable_pll<R: Registers>(hw: &mut R) {
    info!("Disabling USB PLL.");
    hw.write(Reg::UsbCtrl, UsbCtrl::new().with_usb_en(true).into_bits());
    while UsbCtrl::from_bits(hw.read(Reg::UsbCtrl)).pll_locked() {
        core::hint::spin_loop();
    }
}

/// Clear all USB interrupt flags and enable the USB and D+ wake-up interrupts.
pub(crate) fn enable_interrupts<R: Registers>(hw: &mut R) {
    for reg in [Reg::UsbIif, Reg::UsbCif, Reg::UsbOif, Reg::P2Ifg] {
        hw.write(reg, 0);
    }
    hw.modify(Reg::Ircon2, |value| value & !bits::IRCON2_P2IF);
    hw.modify(Reg::P2Ien, |value| value | bits::P2_DP);
    hw.modify(Reg::Ien2, |value| value | bits::IEN2_P2IE);
}
