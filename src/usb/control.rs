//! The control endpoint.
//!
//! A control transfer spans several interrupts: the setup packet arrives, then the data stage is
//! moved one packet per interrupt, and finally the status stage is acknowledged. [ControlEndpoint]
//! keeps the state between these interrupts. Data stages are moved by the DMA channel between
//! the EP0 FIFO and either xdata or another FIFO register, which lets the host access memory and
//! the radio FIFOs directly.
//!
//! Side effects, which the host must not observe before the status stage completed, like
//! entering the bootloader or starting a transmission, are returned as a [Deferred] action once
//! the transfer is done.

use macro_bits::serializable_enum;

use crate::{
    config::{layout, CONTROL_EP, CONTROL_MAX_PACKET, DFU_INTERFACE, INTERFACE_COUNT, MAX_EP},
    dma::{AddressMode, DmaDescriptor, DmaSource},
    regs::{select_endpoint, Cs0, Hardware, InCsrLow, OutCsrLow, Reg, Registers},
    rx::RxPipeline,
    tx::{TxMode, TxPipeline},
    usb::{
        descriptor::{self, DynamicDescriptors},
        request::{
            ControlRequest, DfuRequest, Recipient, RequestKind, StandardRequest, VendorRequest,
            ENDPOINT_HALT,
        },
    },
    WpanError, WpanResult,
};

/// Phase of the current control transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlState {
    /// Waiting for a setup packet.
    Idle,
    /// OUT data stage in progress.
    ReceivingData,
    /// IN data stage in progress.
    SendingData,
    /// The data stage is done and the status stage is being acknowledged.
    Completing,
    /// The request was rejected and the hardware is stalling the next stage.
    Stalling,
}

/// An action to take once a transfer completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Deferred {
    EnterBootloader,
    Transmit(TxMode),
}

/// What a request handler wants done next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Response {
    /// No data stage.
    Done,
    /// Send `len` bytes from `source` to the host.
    Send {
        source: DmaSource,
        mode: AddressMode,
        len: u16,
    },
    /// Receive `len` bytes from the host into `dst`.
    Receive {
        dst: u16,
        mode: AddressMode,
        len: u16,
    },
}
impl Response {
    const fn send(source: DmaSource, len: u16) -> Self {
        Self::Send {
            source,
            mode: AddressMode::Increment,
            len,
        }
    }
    /// Replies consisting of zeros, from the reserved USB register, which always reads zero.
    const fn zeros(len: u16) -> Self {
        Self::Send {
            source: DmaSource::Xdata(Reg::UsbZero.into_bits()),
            mode: AddressMode::Fixed,
            len,
        }
    }
}

// Request codes usable as patterns.
const GET_STATUS: u8 = StandardRequest::GetStatus.into_bits();
const CLEAR_FEATURE: u8 = StandardRequest::ClearFeature.into_bits();
const SET_FEATURE: u8 = StandardRequest::SetFeature.into_bits();
const SET_ADDRESS: u8 = StandardRequest::SetAddress.into_bits();
const GET_DESCRIPTOR: u8 = StandardRequest::GetDescriptor.into_bits();
const GET_CONFIGURATION: u8 = StandardRequest::GetConfiguration.into_bits();
const SET_CONFIGURATION: u8 = StandardRequest::SetConfiguration.into_bits();
const GET_INTERFACE: u8 = StandardRequest::GetInterface.into_bits();
const SET_INTERFACE: u8 = StandardRequest::SetInterface.into_bits();
const XDATA_READ: u8 = VendorRequest::XdataRead.into_bits();
const XDATA_WRITE: u8 = VendorRequest::XdataWrite.into_bits();
const FIFO_READ: u8 = VendorRequest::FifoRead.into_bits();
const FIFO_WRITE: u8 = VendorRequest::FifoWrite.into_bits();
const TX: u8 = VendorRequest::Tx.into_bits();
const SET_CSMA: u8 = VendorRequest::SetCsma.into_bits();
const DFU_DETACH: u8 = DfuRequest::Detach.into_bits();

serializable_enum! {
    /// Bits of the `GET_STATUS` reply for endpoints.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum EndpointStatus: u8 {
        Active => 0x00,
        Halted => 0x01
    }
}

/// The control endpoint state machine.
pub struct ControlEndpoint {
    state: ControlState,
    request: ControlRequest,
    configuration: u8,
    deferred: Option<Deferred>,
    /// The IN data stage is shorter than requested and ends on a packet boundary, so it must be
    /// terminated by a zero length packet.
    zlp_pending: bool,
    /// Data stage packets moved in the current transfer.
    chunks: u16,
    descriptors: DynamicDescriptors,
}
impl ControlEndpoint {
    pub fn new(ieee_address: [u8; 8]) -> Self {
        Self {
            state: ControlState::Idle,
            request: ControlRequest::EMPTY,
            configuration: 0,
            deferred: None,
            zlp_pending: false,
            chunks: 0,
            descriptors: DynamicDescriptors::render(ieee_address),
        }
    }
    /// Write the computed descriptors to xdata and reset the endpoint.
    pub fn init<H: Hardware>(&mut self, hw: &mut H) {
        self.descriptors.install(hw);
        self.reset(hw);
    }
    /// Return to the unconfigured, idle state, as required after a bus reset.
    pub fn reset<H: Hardware>(&mut self, hw: &mut H) {
        debug!("EP0: reset");
        self.abort(hw);
        self.configuration = 0;
    }
    /// Drop the current transfer, including its deferred action.
    fn abort<H: Hardware>(&mut self, hw: &mut H) {
        hw.disarm();
        self.state = ControlState::Idle;
        self.deferred = None;
        self.zlp_pending = false;
    }

    pub const fn state(&self) -> ControlState {
        self.state
    }
    pub const fn configuration(&self) -> u8 {
        self.configuration
    }
    /// The request currently, or last, being serviced.
    pub const fn request(&self) -> ControlRequest {
        self.request
    }
    pub const fn chunks(&self) -> u16 {
        self.chunks
    }
    pub const fn descriptors(&self) -> &DynamicDescriptors {
        &self.descriptors
    }

    /// Handle an EP0 interrupt.
    ///
    /// Returns the deferred action of the transfer, if it completed in this interrupt. The state
    /// is already [ControlState::Idle] by then.
    pub fn on_interrupt<H: Hardware>(
        &mut self,
        hw: &mut H,
        tx: &mut TxPipeline,
        rx: &mut RxPipeline,
    ) -> Option<Deferred> {
        select_endpoint(hw, CONTROL_EP);
        let cs0 = Cs0::from_bits(hw.read(Reg::USB_CS0));

        if cs0.setup_end() {
            // The host ended the transfer before we were done with it.
            hw.write(Reg::USB_CS0, Cs0::new().with_clr_setup_end(true).into_bits());
            self.abort(hw);
            warn!("EP0: setup end");
        }
        if cs0.sent_stall() {
            hw.write(Reg::USB_CS0, 0);
            self.abort(hw);
            warn!(
                "EP0: sent stall for request type {:#x} request {:#x} value {:#x} index {:#x} length {}",
                self.request.request_type.into_bits(),
                self.request.request,
                self.request.value,
                self.request.index,
                self.request.length
            );
        }

        if cs0.outpkt_rdy() {
            if self.state == ControlState::ReceivingData {
                self.copy_chunk(hw);
                if !hw.is_armed() {
                    self.state = ControlState::Completing;
                }
            } else {
                // A setup packet. Whatever was in progress is abandoned.
                self.abort(hw);
                self.read_setup(hw);
                let response = self.dispatch(hw, tx, rx);
                self.begin(hw, response);
            }

            let mut ack = Cs0::new().with_clr_outpkt_rdy(true);
            match self.state {
                ControlState::Stalling => ack.set_send_stall(true),
                ControlState::Completing => ack.set_data_end(true),
                _ => {}
            }
            hw.write(Reg::USB_CS0, ack.into_bits());
        }

        if self.state == ControlState::SendingData {
            self.send_chunk(hw);
        }

        if self.state == ControlState::Completing {
            self.state = ControlState::Idle;
            trace!("EP0: transfer done after {} packets", self.chunks);
            return self.deferred.take();
        }
        None
    }

    fn read_setup<R: Registers>(&mut self, hw: &mut R) {
        let mut bytes = [0; ControlRequest::SIZE];
        for byte in bytes.iter_mut() {
            *byte = hw.read(Reg::UsbF0);
        }
        self.request = ControlRequest::parse(bytes);
        self.chunks = 0;
        trace!(
            "EP0: request type {:#x} request {:#x} value {:#x} index {:#x} length {}",
            bytes[0],
            self.request.request,
            self.request.value,
            self.request.index,
            self.request.length
        );
    }

    /// Move up to one packet with the DMA channel.
    fn copy_chunk<H: Hardware>(&mut self, hw: &mut H) -> u16 {
        let mut moved = 0;
        while moved < CONTROL_MAX_PACKET && hw.is_armed() {
            hw.trigger();
            moved += 1;
        }
        self.chunks += 1;
        moved
    }

    fn send_chunk<H: Hardware>(&mut self, hw: &mut H) {
        let moved = self.copy_chunk(hw);
        let mut csr = Cs0::new().with_inpkt_rdy(true);
        if !hw.is_armed() {
            if moved == CONTROL_MAX_PACKET && self.zlp_pending {
                // The next packet is the zero length one.
                self.zlp_pending = false;
            } else {
                self.state = ControlState::Completing;
                csr.set_data_end(true);
            }
        }
        hw.write(Reg::USB_CS0, csr.into_bits());
    }

    /// Turn the handler's verdict into the next state, arming the DMA channel for data stages.
    fn begin<H: Hardware>(&mut self, hw: &mut H, response: WpanResult<Response>) {
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    "EP0: stalling request {:#x} {:#x}: {:?}",
                    self.request.request_type.into_bits(),
                    self.request.request,
                    error
                );
                self.deferred = None;
                self.state = ControlState::Stalling;
                return;
            }
        };
        let fifo = Reg::UsbF0.into_bits();
        self.state = match response {
            Response::Done => ControlState::Completing,
            Response::Send { source, mode, len } => {
                trace!("EP0: sending {} bytes", len);
                self.zlp_pending = len < self.request.length && len % CONTROL_MAX_PACKET == 0;
                if len != 0 {
                    hw.configure(&DmaDescriptor::to_fifo(source, mode, fifo, len));
                    hw.arm();
                }
                ControlState::SendingData
            }
            Response::Receive { len: 0, .. } => ControlState::Completing,
            Response::Receive { dst, mode, len } => {
                trace!("EP0: receiving {} bytes into {:#x}", len, dst);
                hw.configure(&DmaDescriptor::from_fifo(fifo, dst, mode, len));
                hw.arm();
                ControlState::ReceivingData
            }
        };
    }

    /// Pick the handler for the request.
    fn dispatch<H: Hardware>(
        &mut self,
        hw: &mut H,
        tx: &mut TxPipeline,
        rx: &mut RxPipeline,
    ) -> WpanResult<Response> {
        let request = self.request;
        match (request.kind(), request.recipient(), request.is_in()) {
            (RequestKind::Standard, Recipient::Device, false) => match request.request {
                SET_ADDRESS => self.set_address(hw),
                SET_CONFIGURATION => self.set_configuration(hw, tx, rx),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Standard, Recipient::Device, true) => match request.request {
                GET_STATUS => self.zeros(2),
                GET_DESCRIPTOR => self.get_descriptor(),
                GET_CONFIGURATION => self.get_configuration(hw),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Standard, Recipient::Interface, false) => match request.request {
                SET_INTERFACE => self.set_interface(),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Standard, Recipient::Interface, true) => match request.request {
                GET_STATUS => self.check_interface().and_then(|_| self.zeros(2)),
                GET_INTERFACE => self.check_interface().and_then(|_| self.zeros(1)),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Standard, Recipient::Endpoint, false) => match request.request {
                SET_FEATURE => self.set_halt(hw, true),
                CLEAR_FEATURE => self.set_halt(hw, false),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Standard, Recipient::Endpoint, true) => match request.request {
                GET_STATUS => self.get_endpoint_status(hw),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Vendor, Recipient::Device, false) => match request.request {
                XDATA_WRITE => Ok(self.receive(request.value, AddressMode::Increment)),
                FIFO_WRITE => Ok(self.receive(request.value, AddressMode::Fixed)),
                TX => self.transmit(hw, tx),
                SET_CSMA => {
                    self.expect_length(0)?;
                    tx.set_csma_params(hw, request.value);
                    Ok(Response::Done)
                }
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Vendor, Recipient::Device, true) => match request.request {
                XDATA_READ => Ok(self.send_from(request.value, AddressMode::Increment)),
                FIFO_READ => Ok(self.send_from(request.value, AddressMode::Fixed)),
                _ => Err(WpanError::UnsupportedRequest),
            },
            (RequestKind::Class, Recipient::Interface, false) => match request.request {
                DFU_DETACH => self.dfu_detach(),
                _ => Err(WpanError::UnsupportedRequest),
            },
            _ => Err(WpanError::UnsupportedRequest),
        }
    }

    fn expect_length(&self, len: u16) -> WpanResult<()> {
        if self.request.length == len {
            Ok(())
        } else {
            Err(WpanError::InvalidLength)
        }
    }
    fn check_interface(&self) -> WpanResult<()> {
        if self.request.index < u16::from(INTERFACE_COUNT) {
            Ok(())
        } else {
            Err(WpanError::InvalidInterface)
        }
    }
    fn zeros(&self, len: u16) -> WpanResult<Response> {
        self.expect_length(len)?;
        Ok(Response::zeros(len))
    }
    fn receive(&self, dst: u16, mode: AddressMode) -> Response {
        Response::Receive {
            dst,
            mode,
            len: self.request.length,
        }
    }
    fn send_from(&self, src: u16, mode: AddressMode) -> Response {
        Response::Send {
            source: DmaSource::Xdata(src),
            mode,
            len: self.request.length,
        }
    }

    fn set_address<R: Registers>(&mut self, hw: &mut R) -> WpanResult<Response> {
        self.expect_length(0)?;
        let address = u8::try_from(self.request.value)
            .ok()
            .filter(|address| *address < 0x80)
            .ok_or(WpanError::InvalidValue)?;
        debug!("EP0: address {}", address);
        hw.write(Reg::UsbAddr, address);
        self.configuration = 0;
        Ok(Response::Done)
    }
    fn set_configuration<H: Hardware>(
        &mut self,
        hw: &mut H,
        tx: &mut TxPipeline,
        rx: &mut RxPipeline,
    ) -> WpanResult<Response> {
        self.expect_length(0)?;
        let configuration = match self.request.value {
            0 => 0,
            1 => 1,
            _ => return Err(WpanError::InvalidValue),
        };
        info!("EP0: configuration {}", configuration);
        self.configuration = configuration;
        if configuration != 0 {
            rx.setup(hw);
            tx.setup(hw);
            select_endpoint(hw, CONTROL_EP);
        }
        Ok(Response::Done)
    }
    fn get_configuration<H: Hardware>(&mut self, hw: &mut H) -> WpanResult<Response> {
        self.expect_length(1)?;
        hw.xdata_write(layout::CONFIGURATION, &[self.configuration]);
        Ok(Response::send(DmaSource::Xdata(layout::CONFIGURATION), 1))
    }
    fn get_descriptor(&self) -> WpanResult<Response> {
        let value = self.request.value;
        let (source, natural_len) = if let Some(descriptor) = descriptor::constant(value) {
            (DmaSource::Flash(descriptor), descriptor::total_length(descriptor))
        } else if let Some((address, descriptor)) = self.descriptors.get(value) {
            (DmaSource::Xdata(address), descriptor::total_length(descriptor))
        } else {
            return Err(WpanError::UnknownDescriptor);
        };
        Ok(Response::send(source, natural_len.min(self.request.length)))
    }
    fn set_interface(&self) -> WpanResult<Response> {
        self.expect_length(0)?;
        self.check_interface()?;
        if self.request.value != 0 {
            return Err(WpanError::InvalidInterface);
        }
        Ok(Response::Done)
    }

    /// Validate `wIndex` as an endpoint address, returning the endpoint index and direction.
    fn endpoint<R: Registers>(&self, hw: &mut R) -> WpanResult<(u8, bool)> {
        let address =
            u8::try_from(self.request.index).map_err(|_| WpanError::InvalidEndpoint)?;
        let (index, is_in) = (address & 0x0f, address & 0x80 != 0);
        if index > MAX_EP {
            return Err(WpanError::InvalidEndpoint);
        }
        select_endpoint(hw, index);
        let max_packet = hw.read(if is_in { Reg::UsbMaxi } else { Reg::UsbMaxo });
        select_endpoint(hw, CONTROL_EP);
        if max_packet == 0 {
            return Err(WpanError::InvalidEndpoint);
        }
        Ok((index, is_in))
    }
    fn get_endpoint_status<H: Hardware>(&mut self, hw: &mut H) -> WpanResult<Response> {
        self.expect_length(2)?;
        let (index, is_in) = self.endpoint(hw)?;
        select_endpoint(hw, index);
        let halted = if is_in {
            InCsrLow::from_bits(hw.read(Reg::UsbCsil)).send_stall()
        } else {
            OutCsrLow::from_bits(hw.read(Reg::UsbCsol)).send_stall()
        };
        select_endpoint(hw, CONTROL_EP);
        let status = if halted {
            EndpointStatus::Halted
        } else {
            EndpointStatus::Active
        };
        hw.xdata_write(layout::STATUS_WORD, &[status.into_bits(), 0]);
        Ok(Response::send(DmaSource::Xdata(layout::STATUS_WORD), 2))
    }
    /// `SET_FEATURE` and `CLEAR_FEATURE` for `ENDPOINT_HALT`.
    fn set_halt<R: Registers>(&mut self, hw: &mut R, halt: bool) -> WpanResult<Response> {
        self.expect_length(0)?;
        if self.request.value != ENDPOINT_HALT {
            return Err(WpanError::InvalidValue);
        }
        let (index, is_in) = self.endpoint(hw)?;
        debug!("EP0: halt endpoint {} IN {}: {}", index, is_in, halt);
        select_endpoint(hw, index);
        match (is_in, halt) {
            (true, true) => hw.modify(Reg::UsbCsil, |csr| {
                InCsrLow::from_bits(csr).with_send_stall(true).into_bits()
            }),
            (false, true) => hw.modify(Reg::UsbCsol, |csr| {
                OutCsrLow::from_bits(csr).with_send_stall(true).into_bits()
            }),
            // Clearing the halt also resets the data toggle.
            (true, false) => hw.write(
                Reg::UsbCsil,
                InCsrLow::new()
                    .with_clr_data_tog(true)
                    .with_flush_packet(true)
                    .into_bits(),
            ),
            (false, false) => hw.write(
                Reg::UsbCsol,
                OutCsrLow::new()
                    .with_clr_data_tog(true)
                    .with_flush_packet(true)
                    .into_bits(),
            ),
        }
        select_endpoint(hw, CONTROL_EP);
        Ok(Response::Done)
    }

    fn transmit<R: Registers>(&mut self, hw: &mut R, tx: &mut TxPipeline) -> WpanResult<Response> {
        tx.prepare(hw, self.request.length)?;
        let mode = if self.request.value != 0 {
            TxMode::Immediate
        } else {
            TxMode::Csma
        };
        self.deferred = Some(Deferred::Transmit(mode));
        Ok(self.receive(Reg::Rfd.into_bits(), AddressMode::Fixed))
    }
    fn dfu_detach(&mut self) -> WpanResult<Response> {
        self.expect_length(0)?;
        if self.request.index != u16::from(DFU_INTERFACE) {
            return Err(WpanError::InvalidInterface);
        }
        info!("EP0: DFU detach");
        self.deferred = Some(Deferred::EnterBootloader);
        Ok(Response::Done)
    }
}
