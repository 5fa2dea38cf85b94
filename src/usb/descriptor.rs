//! USB descriptors.
//!
//! Most descriptors are constant and served straight from flash. Only the serial number depends on
//! the identity of the device, so it is rendered once at init and kept in xdata, from where it's
//! served like any other descriptor.

use crate::{
    config::{
        layout, BCD_DEVICE, CONTROL_MAX_PACKET, DFU_INTERFACE, FW_VERSION, INTERFACE_COUNT,
        MANUFACTURER, PRODUCT, RX_EP, RX_MAX_PACKET, STATUS_EP, STATUS_MAX_PACKET, USB_PID,
        USB_VID, WPAN_INTERFACE,
    },
    regs::Memory,
    usb::request::DescriptorType,
};

pub const LANGID_INDEX: u8 = 0;
pub const SERIAL_INDEX: u8 = 1;
pub const MANUFACTURER_INDEX: u8 = 2;
pub const PRODUCT_INDEX: u8 = 3;
pub const FW_VERSION_INDEX: u8 = 0x80;

/// Size of the DFU blocks we announce.
pub const DFU_TRANSFER_SIZE: u16 = 2048;
/// Time in ms the host waits for us to re-enumerate after `DFU_DETACH`.
pub const DFU_DETACH_TIMEOUT: u16 = 100;

const DEVICE_LEN: usize = 18;
const CONFIGURATION_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;
const ENDPOINT_LEN: usize = 7;
const DFU_FUNCTIONAL_LEN: usize = 9;
const CONFIGURATION_TOTAL_LEN: usize =
    CONFIGURATION_LEN + 2 * INTERFACE_LEN + 2 * ENDPOINT_LEN + DFU_FUNCTIONAL_LEN;

const fn lo(value: u16) -> u8 {
    value.to_le_bytes()[0]
}
const fn hi(value: u16) -> u8 {
    value.to_le_bytes()[1]
}

static DEVICE: [u8; DEVICE_LEN] = [
    DEVICE_LEN as u8,
    DescriptorType::Device.into_bits(),
    0x00, // bcdUSB 2.0
    0x02,
    0x00, // bDeviceClass: per interface
    0x00,
    0x00,
    CONTROL_MAX_PACKET as u8,
    lo(USB_VID),
    hi(USB_VID),
    lo(USB_PID),
    hi(USB_PID),
    lo(BCD_DEVICE),
    hi(BCD_DEVICE),
    MANUFACTURER_INDEX,
    PRODUCT_INDEX,
    SERIAL_INDEX,
    0x01, // bNumConfigurations
];

static CONFIGURATION: [u8; CONFIGURATION_TOTAL_LEN] = [
    CONFIGURATION_LEN as u8,
    DescriptorType::Configuration.into_bits(),
    lo(CONFIGURATION_TOTAL_LEN as u16),
    hi(CONFIGURATION_TOTAL_LEN as u16),
    INTERFACE_COUNT,
    0x01, // bConfigurationValue
    0x00, // iConfiguration
    0x80, // bmAttributes: bus powered
    25,   // bMaxPower: 50 mA
    // WPAN interface
    INTERFACE_LEN as u8,
    DescriptorType::Interface.into_bits(),
    WPAN_INTERFACE,
    0x00, // bAlternateSetting
    0x02, // bNumEndpoints
    0xff, // vendor specific
    0xff,
    0xff,
    0x00, // iInterface
    // Transmit status
    ENDPOINT_LEN as u8,
    DescriptorType::Endpoint.into_bits(),
    0x80 | STATUS_EP,
    0x03, // interrupt
    lo(STATUS_MAX_PACKET),
    hi(STATUS_MAX_PACKET),
    1, // bInterval
    // Received frames
    ENDPOINT_LEN as u8,
    DescriptorType::Endpoint.into_bits(),
    0x80 | RX_EP,
    0x02, // bulk
    lo(RX_MAX_PACKET),
    hi(RX_MAX_PACKET),
    255, // bInterval
    // DFU runtime interface
    INTERFACE_LEN as u8,
    DescriptorType::Interface.into_bits(),
    DFU_INTERFACE,
    0x00, // bAlternateSetting
    0x00, // bNumEndpoints
    0xfe, // application specific
    0x01, // DFU
    0x01, // runtime protocol
    0x00, // iInterface
    DFU_FUNCTIONAL_LEN as u8,
    DescriptorType::DfuFunctional.into_bits(),
    0x0f, // will detach, manifestation tolerant, can upload, can download
    lo(DFU_DETACH_TIMEOUT),
    hi(DFU_DETACH_TIMEOUT),
    lo(DFU_TRANSFER_SIZE),
    hi(DFU_TRANSFER_SIZE),
    0x00, // bcdDFUVersion 1.0
    0x01,
];

static LANGID: [u8; 4] = [4, DescriptorType::String.into_bits(), 0x09, 0x04];
static MANUFACTURER_STRING: [u8; string_len(MANUFACTURER)] = string_descriptor(MANUFACTURER);
static PRODUCT_STRING: [u8; string_len(PRODUCT)] = string_descriptor(PRODUCT);
static FW_VERSION_STRING: [u8; string_len(FW_VERSION)] = string_descriptor(FW_VERSION);

/// Length of the string descriptor for `text`.
pub const fn string_len(text: &str) -> usize {
    2 + 2 * text.len()
}
/// Encode an ASCII string as a string descriptor.
pub const fn string_descriptor<const N: usize>(text: &str) -> [u8; N] {
    let text = text.as_bytes();
    assert!(N == 2 + 2 * text.len() && N <= 0xff);
    let mut descriptor = [0; N];
    descriptor[0] = N as u8;
    descriptor[1] = DescriptorType::String.into_bits();
    let mut i = 0;
    while i < text.len() {
        descriptor[2 + 2 * i] = text[i];
        i += 1;
    }
    descriptor
}

/// The number of bytes to send for a descriptor, given its first bytes.
///
/// The configuration descriptor is followed by its interfaces, endpoints and functional
/// descriptors, so `wTotalLength` applies there, and `bLength` everywhere else.
pub fn total_length(descriptor: &[u8]) -> u16 {
    match descriptor {
        [_, kind, lo, hi, ..] if *kind == DescriptorType::Configuration.into_bits() => {
            u16::from_le_bytes([*lo, *hi])
        }
        [len, ..] => u16::from(*len),
        [] => 0,
    }
}

/// Look up a descriptor in the constant table, by the `wValue` of `GET_DESCRIPTOR`.
pub fn constant(value: u16) -> Option<&'static [u8]> {
    let [index, kind] = value.to_le_bytes();
    if kind == DescriptorType::Device.into_bits() && index == 0 {
        Some(&DEVICE)
    } else if kind == DescriptorType::Configuration.into_bits() && index == 0 {
        Some(&CONFIGURATION)
    } else if kind == DescriptorType::String.into_bits() {
        match index {
            LANGID_INDEX => Some(&LANGID),
            MANUFACTURER_INDEX => Some(&MANUFACTURER_STRING),
            PRODUCT_INDEX => Some(&PRODUCT_STRING),
            FW_VERSION_INDEX => Some(&FW_VERSION_STRING),
            _ => None,
        }
    } else {
        None
    }
}

/// Number of hex digits in the serial number.
const SERIAL_DIGITS: usize = 16;
pub const SERIAL_LEN: usize = 2 + 2 * SERIAL_DIGITS;

/// Descriptors that are computed at init.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicDescriptors {
    serial: [u8; SERIAL_LEN],
}
impl DynamicDescriptors {
    /// Render the descriptors for a device with the given IEEE address, least significant byte
    /// first.
    pub fn render(ieee_address: [u8; 8]) -> Self {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut serial = [0; SERIAL_LEN];
        serial[0] = SERIAL_LEN as u8;
        serial[1] = DescriptorType::String.into_bits();
        let digits = ieee_address
            .iter()
            .rev()
            .flat_map(|byte| [HEX[(byte >> 4) as usize], HEX[(byte & 0xf) as usize]]);
        for (chunk, digit) in serial[2..].chunks_exact_mut(2).zip(digits) {
            chunk[0] = digit;
        }
        Self { serial }
    }
    /// Copy the rendered descriptors to their xdata locations.
    pub fn install<M: Memory>(&self, memory: &mut M) {
        memory.xdata_write(layout::SERIAL_DESCRIPTOR, &self.serial);
    }
    /// Look up a descriptor, returning its xdata address and contents.
    pub fn get(&self, value: u16) -> Option<(u16, &[u8])> {
        let [index, kind] = value.to_le_bytes();
        (kind == DescriptorType::String.into_bits() && index == SERIAL_INDEX)
            .then_some((layout::SERIAL_DESCRIPTOR, &self.serial[..]))
    }
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }
}
