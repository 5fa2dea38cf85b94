use core::cell::RefCell;

use embassy_sync::blocking_mutex;
use static_cell::StaticCell;

use crate::{
    config::{AdapterConfig, FW_VERSION},
    radio,
    regs::Hardware,
    rx::RxPipeline,
    sync::SleepRequest,
    tx::TxPipeline,
    usb::{
        self,
        control::{ControlEndpoint, ControlState, Deferred},
    },
    DefaultRawMutex,
};

/// The adapter, owning the hardware and all components.
///
/// Each interrupt vector of the chip maps to one method here, which must be called from that
/// vector. None of them block, except for the PLL lock waits on USB suspend and resume.
pub struct Adapter<H> {
    pub(crate) hw: H,
    config: AdapterConfig,
    pub(crate) control: ControlEndpoint,
    pub(crate) tx: TxPipeline,
    pub(crate) rx: RxPipeline,
    pub(crate) sleep: SleepRequest,
}
impl<H: Hardware> Adapter<H> {
    pub fn new(mut hw: H, config: AdapterConfig) -> Self {
        let ieee_address = hw.ieee_address();
        Self {
            hw,
            control: ControlEndpoint::new(ieee_address),
            tx: TxPipeline::new(config.csma),
            rx: RxPipeline::new(),
            sleep: SleepRequest::new(),
            config,
        }
    }
    /// Bring up USB and the radio. Interrupts should be enabled globally afterwards.
    pub fn init(&mut self) {
        info!("CC2531 WPAN adapter {} online!", FW_VERSION);
        usb::enable_pll(&mut self.hw);
        self.hw.usb_pullup(true);
        usb::enable_interrupts(&mut self.hw);
        self.control.init(&mut self.hw);

        let ieee_address = self.hw.ieee_address();
        radio::setup(&mut self.hw, &self.config, ieee_address);
    }

    /// The RF interrupt vector.
    pub fn on_rf_interrupt(&mut self) {
        radio::on_event(&mut self.hw, &mut self.tx, &mut self.rx);
    }
    /// The RFERR interrupt vector.
    pub fn on_rf_error_interrupt(&mut self) {
        radio::on_error(&mut self.hw, &mut self.tx);
    }

    /// Carry out what a completed control transfer deferred.
    pub(crate) fn run_deferred(&mut self, action: Deferred) {
        match action {
            Deferred::EnterBootloader => {
                info!("Entering bootloader.");
                self.hw.enter_bootloader();
            }
            Deferred::Transmit(mode) => self.tx.transmit(&mut self.hw, mode),
        }
    }

    /// One iteration of the main loop.
    pub fn poll(&mut self) {
        self.hw.feed_watchdog();
        self.maybe_sleep();
    }
    /// Enter low power mode, if an interrupt handler asked for it.
    ///
    /// Returns after waking up, with `true` if we slept.
    pub fn maybe_sleep(&mut self) -> bool {
        if !self.prepare_sleep() {
            return false;
        }
        critical_section::with(|_| H::enter_low_power());
        self.resume();
        true
    }
    /// Take a pending sleep request and stop the radio for it.
    ///
    /// If this returns `true`, the caller has to enter low power mode and call [Self::resume]
    /// once woken up.
    pub fn prepare_sleep(&mut self) -> bool {
        if !critical_section::with(|_| self.sleep.take()) {
            return false;
        }
        info!("Entering PM1.");
        radio::stop(&mut self.hw);
        self.hw.feed_watchdog();
        true
    }
    pub fn resume(&mut self) {
        self.hw.feed_watchdog();
        info!("Resuming now.");
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }
    pub fn control_state(&self) -> ControlState {
        self.control.state()
    }
    pub fn control(&self) -> &ControlEndpoint {
        &self.control
    }
    pub fn tx(&self) -> &TxPipeline {
        &self.tx
    }
    pub fn rx(&self) -> &RxPipeline {
        &self.rx
    }
    pub fn sleep_requested(&self) -> bool {
        self.sleep.is_pending()
    }
}

/// An [Adapter] shared between the main loop and the interrupt handlers.
pub struct SharedAdapter<H> {
    adapter: blocking_mutex::Mutex<DefaultRawMutex, RefCell<Adapter<H>>>,
}
impl<H: Hardware> SharedAdapter<H> {
    pub const fn new(adapter: Adapter<H>) -> Self {
        Self {
            adapter: blocking_mutex::Mutex::new(RefCell::new(adapter)),
        }
    }
    /// Move the adapter into `cell`, so that interrupt handlers can reach it.
    pub fn install(cell: &'static StaticCell<Self>, adapter: Adapter<H>) -> &'static Self {
        cell.init(Self::new(adapter))
    }
    pub fn with<R>(&self, f: impl FnOnce(&mut Adapter<H>) -> R) -> R {
        self.adapter.lock(|adapter| f(&mut *adapter.borrow_mut()))
    }
    pub fn on_usb_interrupt(&self) {
        self.with(Adapter::on_usb_interrupt);
    }
    pub fn on_rf_interrupt(&self) {
        self.with(Adapter::on_rf_interrupt);
    }
    pub fn on_rf_error_interrupt(&self) {
        self.with(Adapter::on_rf_error_interrupt);
    }
    /// One main loop iteration.
    ///
    /// The adapter is only borrowed with interrupts held off, and never while sleeping, since the
    /// interrupt that wakes us up runs its handler before the sleep returns.
    pub fn poll(&self) {
        let sleep = critical_section::with(|_| {
            self.with(|adapter| {
                adapter.hw.feed_watchdog();
                adapter.prepare_sleep()
            })
        });
        if sleep {
            critical_section::with(|_| H::enter_low_power());
            critical_section::with(|_| self.with(Adapter::resume));
        }
    }
    pub fn run(&self) -> ! {
        loop {
            self.poll();
        }
    }
}
