use bitfield_struct::bitfield;
use macro_bits::serializable_enum;

/// The type field of `bmRequestType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}
impl RequestKind {
    const fn into_bits(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Class => 1,
            Self::Vendor => 2,
            Self::Reserved => 3,
        }
    }
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Standard,
            1 => Self::Class,
            2 => Self::Vendor,
            _ => Self::Reserved,
        }
    }
}

/// The recipient field of `bmRequestType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}
impl Recipient {
    const fn into_bits(self) -> u8 {
        match self {
            Self::Device => 0,
            Self::Interface => 1,
            Self::Endpoint => 2,
            Self::Other => 3,
            Self::Reserved => 0x1f,
        }
    }
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Device,
            1 => Self::Interface,
            2 => Self::Endpoint,
            3 => Self::Other,
            _ => Self::Reserved,
        }
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// `bmRequestType`
pub struct RequestType {
    #[bits(5)]
    pub recipient: Recipient,
    #[bits(2)]
    pub kind: RequestKind,
    /// Set for device to host (IN) requests.
    pub device_to_host: bool,
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum StandardRequest: u8 {
        GetStatus => 0x00,
        ClearFeature => 0x01,
        SetFeature => 0x03,
        SetAddress => 0x05,
        GetDescriptor => 0x06,
        SetDescriptor => 0x07,
        GetConfiguration => 0x08,
        SetConfiguration => 0x09,
        GetInterface => 0x0a,
        SetInterface => 0x0b,
        SynchFrame => 0x0c
    }
}

serializable_enum! {
    /// Requests of the WPAN interface, all addressed to the device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum VendorRequest: u8 {
        /// Read `wLength` bytes of xdata starting at `wValue`.
        XdataRead => 0x00,
        /// Write `wLength` bytes of xdata starting at `wValue`.
        XdataWrite => 0x01,
        /// Read `wLength` bytes from the FIFO register at `wValue`.
        FifoRead => 0x02,
        /// Write `wLength` bytes to the FIFO register at `wValue`.
        FifoWrite => 0x03,
        /// Transmit the frame in the data stage. `wValue` of zero selects CSMA-CA.
        Tx => 0x04,
        /// Set the CSMA-CA parameters packed into `wValue`.
        SetCsma => 0x05
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum DfuRequest: u8 {
        Detach => 0x00,
        Dnload => 0x01,
        Upload => 0x02,
        GetStatus => 0x03,
        ClrStatus => 0x04,
        GetState => 0x05,
        Abort => 0x06
    }
}

/// The only feature selector we support.
pub const ENDPOINT_HALT: u16 = 0;

serializable_enum! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum DescriptorType: u8 {
        Device => 0x01,
        Configuration => 0x02,
        String => 0x03,
        Interface => 0x04,
        Endpoint => 0x05,
        DfuFunctional => 0x21
    }
}

/// A decoded setup packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}
impl ControlRequest {
    pub const SIZE: usize = 8;
    pub const EMPTY: Self = Self::parse([0; Self::SIZE]);

    pub const fn parse(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            request_type: RequestType::from_bits(bytes[0]),
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
    pub const fn to_bytes(&self) -> [u8; Self::SIZE] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type.into_bits(),
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }
    pub const fn kind(&self) -> RequestKind {
        self.request_type.kind()
    }
    pub const fn recipient(&self) -> Recipient {
        self.request_type.recipient()
    }
    pub const fn is_in(&self) -> bool {
        self.request_type.device_to_host()
    }
}
