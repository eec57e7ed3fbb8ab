// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Wire formats for tunneling PLDM firmware-update commands to a network
//! controller over the NC-SI sideband channel.
//!
//! There are two nested protocols here. The outer one is the envelope
//! exchanged with the in-kernel NC-SI driver, described in [`frame`] and
//! [`ncsi`]. The inner one is the DMTF PLDM for Firmware Update command set
//! (DSP0267), described in [`pldm`], whose messages ride in the payload of the
//! outer envelope.

pub mod frame;
pub mod ncsi;
pub mod pldm;

pub use frame::DeviceName;
pub use frame::RequestFrame;
pub use frame::ResponseFrame;

/// The maximum size of the payload of a single NC-SI command or response, as
/// defined by the kernel driver's message structure.
pub const MAX_PAYLOAD_SIZE: usize = 1480;

/// The size of the network device name field, including the trailing NUL.
pub const DEVICE_NAME_SIZE: usize = 10;

/// The netlink protocol number used by the legacy NC-SI driver.
pub const NETLINK_USER: i32 = 31;

/// The network device used when none is specified.
pub const DEFAULT_DEVICE: &str = "eth0";

/// The default maximum transfer size offered to a device during an update.
pub const DEFAULT_MAX_TRANSFER_SIZE: u32 = 1024;

/// An error encoding or decoding a sideband frame or PLDM message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// A payload does not fit in a single NC-SI frame.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE}-byte frame capacity")]
    PayloadTooLarge(usize),

    /// The network device name is empty, contains a NUL, or is too long.
    #[error("invalid network device name: must be 1 to {} bytes", DEVICE_NAME_SIZE - 1)]
    InvalidDeviceName,

    /// A buffer is too short to hold the item being decoded.
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// A header declares more payload than was actually received.
    #[error("declared payload length {declared} exceeds {received} received bytes")]
    LengthMismatch { declared: usize, received: usize },

    /// A version string is longer than its one-byte length field allows.
    #[error("version string of {0} bytes is too long")]
    VersionStringTooLong(usize),

    /// A fixed-layout structure failed to serialize or deserialize.
    #[error("malformed fixed-layout field")]
    Serialization,
}

impl From<hubpack::Error> for Error {
    fn from(_: hubpack::Error) -> Self {
        Error::Serialization
    }
}
