//! A fake CC2531 for driving the adapter without hardware.
//!
//! The register file is a plain map, with the side effects the adapter relies on modeled on top:
//! endpoint registers banked by `USBINDEX`, USB flag registers cleared on read, the EP0 and IN
//! endpoint FIFOs, the radio FIFOs, command strobes, the CSP and the DMA channel. Everything the
//! firmware does, that a host or an antenna would notice, is recorded for assertions.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
};

use cc2531_wpan::{
    csp::{self, CspCommand, Instruction, Outcome, Sequencer},
    dma::{AddressMode, DmaDescriptor, DmaSource},
    regs::{bits, Cs0, InCsrLow, RfErr, RfIrq0, RfIrq1, UsbCommon, UsbCtrl},
    DmaChannel, Memory, Platform, Reg, Registers,
};

const USB_IIF: u16 = Reg::UsbIif.into_bits();
const USB_OIF: u16 = Reg::UsbOif.into_bits();
const USB_CIF: u16 = Reg::UsbCif.into_bits();
const USB_ZERO: u16 = Reg::UsbZero.into_bits();
const USB_INDEX: u16 = Reg::UsbIndex.into_bits();
const USB_CTRL: u16 = Reg::UsbCtrl.into_bits();
const USB_CSIL: u16 = Reg::UsbCsil.into_bits();
const BANKED_FIRST: u16 = Reg::UsbMaxi.into_bits();
const BANKED_LAST: u16 = Reg::UsbCnth.into_bits();
const USB_F0: u16 = Reg::UsbF0.into_bits();
const USB_F5: u16 = Reg::UsbF5.into_bits();
const RFD: u16 = Reg::Rfd.into_bits();
const RFST: u16 = Reg::Rfst.into_bits();
const CSP_X: u16 = Reg::CspX.into_bits();
const CSP_Y: u16 = Reg::CspY.into_bits();
const CSP_Z: u16 = Reg::CspZ.into_bits();
/// Everything from here on is a register.
const REGISTER_SPACE: u16 = 0x6000;
/// Size of the general purpose RAM.
const XDATA_SIZE: usize = 0x2000;

const START: u8 = CspCommand::Start.into_bits();
const TX_ON: u8 = CspCommand::TxOn.into_bits();
const FLUSH_RX: u8 = CspCommand::FlushRx.into_bits();
const FLUSH_TX: u8 = CspCommand::FlushTx.into_bits();
const CLEAR: u8 = CspCommand::Clear.into_bits();
/// Immediate strobes start here, everything below is a program instruction.
const FIRST_IMMEDIATE_STROBE: u8 = 0xe0;

/// Observable actions of the firmware, in the order they happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A write to `USBCS0`.
    Cs0(u8),
    /// An immediate command strobe.
    Strobe(u8),
    /// An instruction appended to the CSP program.
    Program(u8),
    DmaArmed,
    EnterBootloader,
}

thread_local! {
    /// Power mode registers are global, so low power mode is modeled per test thread.
    static LOW_POWER_ENTRIES: Cell<usize> = const { Cell::new(0) };
    static WAKE_UP: RefCell<Option<Box<dyn FnMut()>>> = const { RefCell::new(None) };
}

/// Clear channel assessments, as the CSP will see them.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    /// Results of the upcoming assessments. Once these ran out, the channel is clear.
    pub assessments: VecDeque<bool>,
    pub random: u8,
}
impl ScriptedChannel {
    pub fn busy() -> Self {
        Self {
            assessments: std::iter::repeat(false).take(256).collect(),
            random: 0,
        }
    }
}
impl csp::Channel for ScriptedChannel {
    fn is_clear(&mut self) -> bool {
        self.assessments.pop_front().unwrap_or(true)
    }
    fn random(&mut self) -> u8 {
        self.random
    }
}

/// One program run of the CSP.
#[derive(Clone, Copy, Debug)]
pub struct CspRun {
    /// `X`, `Y` and `Z` at the start strobe.
    pub start: (u8, u8, u8),
    /// The operand of `INCMAXY` in the loaded program.
    pub max_be: Option<u8>,
    pub run: csp::Run,
}

pub struct FakeCc2531 {
    regs: HashMap<u16, u8>,
    banked: [[u8; 8]; 16],
    index: u8,
    xdata: Vec<u8>,

    cs0: Cs0,
    in_flags: u8,
    out_flags: u8,
    common_flags: u8,
    /// Setup packets and OUT data sent to EP0 by the host.
    ep0_out: VecDeque<u8>,
    ep0_in: Vec<u8>,
    /// IN packets handed to the host on EP0.
    pub ep0_packets: Vec<Vec<u8>>,
    in_fifos: [Vec<u8>; 6],
    /// IN packets handed to the host on the other endpoints.
    pub in_packets: [Vec<Vec<u8>>; 6],

    pub rx_fifo: VecDeque<u8>,
    pub tx_fifo: Vec<u8>,
    /// Contents of the TX FIFO at every transmission.
    pub transmitted: Vec<Vec<u8>>,
    pub sequencer: Sequencer,
    pub channel: ScriptedChannel,
    pub csp_runs: Vec<CspRun>,

    dma: Option<DmaDescriptor>,
    dma_moved: u16,
    dma_armed: bool,
    pub dma_arms: usize,
    pub dma_bytes: usize,

    pub ieee_address: [u8; 8],
    pub pullup: bool,
    pub watchdog_feeds: usize,
    pub events: Vec<Event>,
}

impl FakeCc2531 {
    /// How often this test thread entered low power mode.
    pub fn low_power_entries() -> usize {
        LOW_POWER_ENTRIES.with(Cell::get)
    }
    /// Run `wake_up` whenever low power mode is entered, as the handler of the waking interrupt.
    pub fn on_wake_up(wake_up: impl FnMut() + 'static) {
        WAKE_UP.with(|hook| *hook.borrow_mut() = Some(Box::new(wake_up)));
    }

    pub fn new(ieee_address: [u8; 8]) -> Self {
        Self {
            regs: HashMap::new(),
            banked: [[0; 8]; 16],
            index: 0,
            xdata: vec![0; XDATA_SIZE],
            cs0: Cs0::new(),
            in_flags: 0,
            out_flags: 0,
            common_flags: 0,
            ep0_out: VecDeque::new(),
            ep0_in: Vec::new(),
            ep0_packets: Vec::new(),
            in_fifos: Default::default(),
            in_packets: Default::default(),
            rx_fifo: VecDeque::new(),
            tx_fifo: Vec::new(),
            transmitted: Vec::new(),
            sequencer: Sequencer::new(),
            channel: ScriptedChannel::default(),
            csp_runs: Vec::new(),
            dma: None,
            dma_moved: 0,
            dma_armed: false,
            dma_arms: 0,
            dma_bytes: 0,
            ieee_address,
            pullup: false,
            watchdog_feeds: 0,
            events: Vec::new(),
        }
    }

    // Host side

    pub fn host_setup(&mut self, setup: [u8; 8]) {
        self.ep0_out.extend(setup);
        self.cs0.set_outpkt_rdy(true);
        self.in_flags |= 1;
    }
    pub fn host_out(&mut self, data: &[u8]) {
        self.ep0_out.extend(data.iter().copied());
        self.cs0.set_outpkt_rdy(true);
        self.in_flags |= 1;
    }
    /// The host fetched the last EP0 IN packet.
    pub fn host_in_ack(&mut self) {
        self.in_flags |= 1;
    }
    /// The host started a new transfer, before the last one was done.
    pub fn host_setup_end(&mut self) {
        self.cs0.set_setup_end(true);
        self.in_flags |= 1;
    }
    pub fn host_got_stall(&mut self) {
        self.cs0.set_sent_stall(true);
        self.in_flags |= 1;
    }
    /// The host fetched the pending packet of an IN endpoint.
    pub fn host_fetch(&mut self, endpoint: u8) {
        let csr = &mut self.banked[endpoint as usize][(USB_CSIL - BANKED_FIRST) as usize];
        *csr = InCsrLow::from_bits(*csr).with_inpkt_rdy(false).into_bits();
        self.in_flags |= 1 << endpoint;
    }
    pub fn set_in_endpoint_stalled(&mut self, endpoint: u8) {
        let csr = &mut self.banked[endpoint as usize][(USB_CSIL - BANKED_FIRST) as usize];
        *csr = InCsrLow::from_bits(*csr)
            .with_inpkt_rdy(false)
            .with_sent_stall(true)
            .into_bits();
        self.in_flags |= 1 << endpoint;
    }
    pub fn bus_reset(&mut self) {
        self.common_flags |= UsbCommon::new().with_reset(true).into_bits();
    }
    pub fn bus_suspend(&mut self) {
        self.common_flags |= UsbCommon::new().with_suspend(true).into_bits();
    }
    /// D+ changed, as it does when the host resumes the bus.
    pub fn bus_resume(&mut self) {
        self.raise(Reg::P2Ifg, bits::P2_DP);
        self.raise(Reg::Ircon2, bits::IRCON2_P2IF);
    }
    pub fn stray_out_flags(&mut self, flags: u8) {
        self.out_flags |= flags;
    }

    // Radio side

    /// A frame arrived in the RX FIFO.
    pub fn radio_receive(&mut self, frame: &[u8]) {
        self.rx_fifo.push_back(frame.len() as u8);
        self.rx_fifo.extend(frame.iter().copied());
        self.raise(Reg::RfIrqF0, RfIrq0::new().with_fifop(true).into_bits());
    }
    pub fn radio_error(&mut self, errors: RfErr) {
        self.raise(Reg::RfErrF, errors.into_bits());
        self.raise(Reg::Tcon, bits::TCON_RFERRIF);
    }
    pub fn raise(&mut self, reg: Reg, flags: u8) {
        *self.regs.entry(reg.into_bits()).or_default() |= flags;
    }

    // Inspection

    /// The value of a plain register, without any read side effects.
    pub fn register(&self, reg: Reg) -> u8 {
        self.regs.get(&reg.into_bits()).copied().unwrap_or(0)
    }
    pub fn set_register(&mut self, reg: Reg, value: u8) {
        self.regs.insert(reg.into_bits(), value);
    }
    /// A banked endpoint register.
    pub fn endpoint_register(&self, endpoint: u8, reg: Reg) -> u8 {
        self.banked[endpoint as usize][(reg.into_bits() - BANKED_FIRST) as usize]
    }
    pub fn xdata(&self, address: u16, len: usize) -> &[u8] {
        &self.xdata[address as usize..address as usize + len]
    }
    pub fn selected_endpoint(&self) -> u8 {
        self.index
    }
    pub fn dma_armed(&self) -> bool {
        self.dma_armed
    }
    pub fn strobes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Strobe(command) => Some(*command),
                _ => None,
            })
            .collect()
    }
    pub fn strobe_count(&self, command: CspCommand) -> usize {
        self.strobes()
            .into_iter()
            .filter(|strobe| *strobe == command.into_bits())
            .count()
    }
    pub fn cs0_writes(&self) -> Vec<Cs0> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Cs0(value) => Some(Cs0::from_bits(*value)),
                _ => None,
            })
            .collect()
    }
    /// Whether EP0 was told to stall the current transfer.
    pub fn stalled(&self) -> bool {
        self.cs0_writes().iter().any(|write| write.send_stall())
    }
    pub fn position(&self, event: Event) -> Option<usize> {
        self.events.iter().position(|logged| *logged == event)
    }

    // Register file

    fn take(flags: &mut u8) -> u8 {
        std::mem::take(flags)
    }
    fn banked_mut(&mut self, address: u16) -> &mut u8 {
        &mut self.banked[self.index as usize][(address - BANKED_FIRST) as usize]
    }
    fn read_address(&mut self, address: u16) -> u8 {
        match address {
            USB_IIF => Self::take(&mut self.in_flags),
            USB_OIF => Self::take(&mut self.out_flags),
            USB_CIF => Self::take(&mut self.common_flags),
            USB_ZERO => 0,
            USB_INDEX => self.index,
            USB_CTRL => {
                let ctrl = UsbCtrl::from_bits(self.regs.get(&address).copied().unwrap_or(0));
                ctrl.with_pll_locked(ctrl.pll_en()).into_bits()
            }
            USB_CSIL if self.index == 0 => self.cs0.into_bits(),
            BANKED_FIRST..=BANKED_LAST => *self.banked_mut(address),
            USB_F0 => self.ep0_out.pop_front().unwrap_or(0),
            RFD => self.rx_fifo.pop_front().unwrap_or(0),
            RFST => 0,
            REGISTER_SPACE.. => self.regs.get(&address).copied().unwrap_or(0),
            _ => self.xdata.get(address as usize).copied().unwrap_or(0),
        }
    }
    fn write_address(&mut self, address: u16, value: u8) {
        match address {
            USB_IIF => self.in_flags &= value,
            USB_OIF => self.out_flags &= value,
            USB_CIF => self.common_flags &= value,
            USB_INDEX => self.index = value & 0x0f,
            USB_CSIL if self.index == 0 => self.write_cs0(value),
            USB_CSIL => self.write_in_csr(value),
            BANKED_FIRST..=BANKED_LAST => *self.banked_mut(address) = value,
            USB_F0 => self.ep0_in.push(value),
            USB_F0..=USB_F5 => self.in_fifos[((address - USB_F0) / 2) as usize].push(value),
            RFD => self.tx_fifo.push(value),
            RFST => self.strobe_byte(value),
            CSP_X => self.sequencer.x = value,
            CSP_Y => self.sequencer.y = value,
            CSP_Z => self.sequencer.z = value,
            REGISTER_SPACE.. => {
                self.regs.insert(address, value);
            }
            _ => {
                if let Some(byte) = self.xdata.get_mut(address as usize) {
                    *byte = value;
                }
            }
        }
    }
    fn write_cs0(&mut self, value: u8) {
        self.events.push(Event::Cs0(value));
        let command = Cs0::from_bits(value);
        if value == 0 {
            self.cs0.set_sent_stall(false);
        }
        if command.clr_outpkt_rdy() {
            self.cs0.set_outpkt_rdy(false);
        }
        if command.clr_setup_end() {
            self.cs0.set_setup_end(false);
        }
        if command.inpkt_rdy() {
            self.ep0_packets.push(std::mem::take(&mut self.ep0_in));
        }
    }
    fn write_in_csr(&mut self, value: u8) {
        let endpoint = self.index as usize;
        let old = InCsrLow::from_bits(*self.banked_mut(USB_CSIL));
        let command = InCsrLow::from_bits(value);
        if command.flush_packet() {
            self.in_fifos[endpoint].clear();
        }
        let mut csr = InCsrLow::new()
            .with_send_stall(command.send_stall())
            .with_sent_stall(old.sent_stall() && command.sent_stall())
            .with_inpkt_rdy(old.inpkt_rdy());
        if command.inpkt_rdy() && !old.inpkt_rdy() {
            let packet = std::mem::take(&mut self.in_fifos[endpoint]);
            self.in_packets[endpoint].push(packet);
            csr.set_inpkt_rdy(true);
        }
        *self.banked_mut(USB_CSIL) = csr.into_bits();
    }

    fn strobe_byte(&mut self, value: u8) {
        if value < FIRST_IMMEDIATE_STROBE {
            self.events.push(Event::Program(value));
            assert!(self.sequencer.push(value), "invalid CSP instruction {value:#x}");
            return;
        }
        self.events.push(Event::Strobe(value));
        match value {
            START => self.run_csp(),
            TX_ON => self.transmit(),
            FLUSH_RX => self.rx_fifo.clear(),
            FLUSH_TX => self.tx_fifo.clear(),
            CLEAR => self.sequencer.clear(),
            _ => {}
        }
    }
    fn transmit(&mut self) {
        self.transmitted.push(self.tx_fifo.clone());
        self.raise(Reg::RfIrqF1, RfIrq1::new().with_txdone(true).into_bits());
    }
    fn run_csp(&mut self) {
        let start = (self.sequencer.x, self.sequencer.y, self.sequencer.z);
        let max_be = self
            .sequencer
            .program()
            .iter()
            .find_map(|instruction| match instruction {
                Instruction::IncMaxY(max) => Some(*max),
                _ => None,
            });
        let run = self.sequencer.run(&mut self.channel);
        match run.outcome {
            Outcome::Transmitted => self.transmit(),
            Outcome::Interrupt => {
                self.raise(Reg::RfIrqF1, RfIrq1::new().with_csp_manint(true).into_bits())
            }
            Outcome::Stopped => {}
        }
        self.csp_runs.push(CspRun { start, max_be, run });
    }
}

impl Registers for FakeCc2531 {
    fn read(&mut self, reg: Reg) -> u8 {
        self.read_address(reg.into_bits())
    }
    fn write(&mut self, reg: Reg, value: u8) {
        self.write_address(reg.into_bits(), value);
    }
}

impl Memory for FakeCc2531 {
    fn xdata_write(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        self.xdata[start..start + data.len()].copy_from_slice(data);
    }
}

fn advance(address: u16, mode: AddressMode, offset: u16) -> u16 {
    match mode {
        AddressMode::Fixed => address,
        AddressMode::Increment => address.wrapping_add(offset),
    }
}

impl DmaChannel for FakeCc2531 {
    fn configure(&mut self, descriptor: &DmaDescriptor) {
        assert!(!self.dma_armed, "reconfigured an armed DMA channel");
        self.dma = Some(*descriptor);
        self.dma_moved = 0;
    }
    fn arm(&mut self) {
        self.events.push(Event::DmaArmed);
        self.dma_arms += 1;
        self.dma_armed = self.dma.is_some_and(|descriptor| descriptor.len > 0);
    }
    fn disarm(&mut self) {
        self.dma_armed = false;
    }
    fn is_armed(&mut self) -> bool {
        self.dma_armed
    }
    fn trigger(&mut self) {
        let Some(descriptor) = self.dma.filter(|_| self.dma_armed) else {
            return;
        };
        let offset = self.dma_moved;
        let byte = match descriptor.src {
            DmaSource::Flash(data) => data.get(offset as usize).copied().unwrap_or(0xff),
            DmaSource::Xdata(address) => {
                self.read_address(advance(address, descriptor.src_mode, offset))
            }
        };
        self.write_address(advance(descriptor.dst, descriptor.dst_mode, offset), byte);
        self.dma_moved += 1;
        self.dma_bytes += 1;
        if self.dma_moved == descriptor.len {
            self.dma_armed = false;
        }
    }
}

impl Platform for FakeCc2531 {
    fn ieee_address(&mut self) -> [u8; 8] {
        self.ieee_address
    }
    fn usb_pullup(&mut self, enabled: bool) {
        self.pullup = enabled;
    }
    fn enter_bootloader(&mut self) {
        self.events.push(Event::EnterBootloader);
    }
    fn enter_low_power() {
        LOW_POWER_ENTRIES.with(|entries| entries.set(entries.get() + 1));
        // The hook may sleep again, so it can't stay borrowed while running.
        let hook = WAKE_UP.with(|hook| hook.borrow_mut().take());
        if let Some(mut hook) = hook {
            hook();
            WAKE_UP.with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            });
        }
    }
    fn feed_watchdog(&mut self) {
        self.watchdog_feeds += 1;
    }
}
