/// An error that occurred while servicing the host.
///
/// All of these end up as a protocol stall on the control endpoint, they are never fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WpanError {
    /// No handler exists for this combination of request type and request code.
    UnsupportedRequest,
    /// The data stage length doesn't match what the request requires.
    InvalidLength,
    /// The endpoint is out of range or not configured.
    InvalidEndpoint,
    /// The interface or alternate setting doesn't exist.
    InvalidInterface,
    /// `wValue` holds something we don't support.
    InvalidValue,
    /// Neither descriptor table has an entry for the requested type and index.
    UnknownDescriptor,
    /// The frame doesn't fit into the TX FIFO.
    FrameTooLong,
}
pub type WpanResult<T> = Result<T, WpanError>;
