//! Shared helpers for the adapter tests.
//!
//! Tests drive an [Adapter] on top of [FakeCc2531] by playing the host: they queue what the host
//! sends, raise the interrupt the USB controller would raise and inspect what came out.

#![allow(dead_code)]

pub mod mock_hardware;

use cc2531_wpan::{Adapter, AdapterConfig, ControlState};
pub use mock_hardware::{Event, FakeCc2531, ScriptedChannel};

pub const IEEE_ADDRESS: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];

/// Upper bound on interrupts per transfer, so a stuck state machine fails instead of hanging.
const MAX_INTERRUPTS: usize = 64;

/// An initialized adapter in the default state.
pub fn adapter() -> Adapter<FakeCc2531> {
    let mut adapter = Adapter::new(FakeCc2531::new(IEEE_ADDRESS), AdapterConfig::default());
    adapter.init();
    adapter
}

/// An initialized adapter with configuration 1 set, so both data pipelines are running.
pub fn configured() -> Adapter<FakeCc2531> {
    let mut adapter = adapter();
    assert_eq!(control_out(&mut adapter, setup(0x00, 0x09, 1, 0, 0), &[]), None);
    assert_eq!(adapter.control().configuration(), 1);
    adapter
}

/// Build a setup packet.
pub fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let [value_lo, value_hi] = value.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        request_type,
        request,
        value_lo,
        value_hi,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

/// Run a transfer with an IN data stage.
///
/// Returns the data the host received, or `None` if the request was stalled.
pub fn control_in(adapter: &mut Adapter<FakeCc2531>, setup: [u8; 8]) -> Option<Vec<u8>> {
    let packets_before = adapter.hardware().ep0_packets.len();
    adapter.hardware_mut().host_setup(setup);
    adapter.on_usb_interrupt();
    for _ in 0..MAX_INTERRUPTS {
        if adapter.control_state() != ControlState::SendingData {
            break;
        }
        adapter.hardware_mut().host_in_ack();
        adapter.on_usb_interrupt();
    }
    match adapter.control_state() {
        ControlState::Idle => Some(adapter.hardware().ep0_packets[packets_before..].concat()),
        ControlState::Stalling => None,
        state => panic!("transfer stuck in {state:?}"),
    }
}

/// Run a transfer with an optional OUT data stage, sending `data` in packets of 32 bytes.
///
/// Returns the state the control endpoint was left in, if that isn't [ControlState::Idle].
pub fn control_out(
    adapter: &mut Adapter<FakeCc2531>,
    setup: [u8; 8],
    data: &[u8],
) -> Option<ControlState> {
    adapter.hardware_mut().host_setup(setup);
    adapter.on_usb_interrupt();
    for chunk in data.chunks(32) {
        if adapter.control_state() != ControlState::ReceivingData {
            break;
        }
        adapter.hardware_mut().host_out(chunk);
        adapter.on_usb_interrupt();
    }
    Some(adapter.control_state()).filter(|state| *state != ControlState::Idle)
}
