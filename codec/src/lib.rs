// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Encode and decode the PLDM firmware-update command stream carried over
//! NC-SI.
//!
//! Everything in this crate is pure: functions build request frames from a
//! firmware [`Package`], decode response frames, and compute replies to the
//! commands a device issues during the transfer phase. No function does I/O
//! or retries; a malformed input is reported as an [`Error`] and it is up to
//! the caller to decide what that means for an update in progress.

pub mod command;
pub mod decode;
pub mod encode;
pub mod handler;
pub mod package;

pub use command::CommandRequest;
pub use command::CommandResponse;
pub use decode::decode_completion_code;
pub use decode::decode_pending_command;
pub use decode::decode_response;
pub use decode::PendingCommand;
pub use decode::PendingCommandKind;
pub use encode::encode_activate_firmware;
pub use encode::encode_cancel_update;
pub use encode::encode_pass_component_table;
pub use encode::encode_request_update;
pub use encode::encode_update_component;
pub use handler::handle_pending_command;
pub use handler::Reply;
pub use handler::TransferContext;
pub use package::ComponentInfo;
pub use package::FirmwarePackage;
pub use package::Package;
pub use package::PackageError;

use ncsi_messages::ncsi;
use ncsi_messages::pldm;
use ncsi_messages::Error as MessageError;
use ncsi_messages::MAX_PAYLOAD_SIZE;

/// The most image data that fits in a single RequestFirmwareData reply.
pub const MAX_FIRMWARE_DATA: usize = MAX_PAYLOAD_SIZE - pldm::Header::SIZE - 1;

/// An error encoding or decoding a firmware-update command.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("malformed frame or message")]
    Message(#[from] MessageError),

    #[error("NC-SI command did not complete: {0}")]
    Ncsi(ncsi::Status),

    #[error("message has PLDM type 0x{0:02x}, expected firmware update")]
    UnexpectedPldmType(u8),

    #[error("expected a PLDM response, found a request")]
    NotAResponse,

    #[error("response to command 0x{command:02x} (instance {instance_id}) does not match request")]
    UnexpectedResponse { command: u8, instance_id: u8 },

    #[error("package has {0} components, more than a request can describe")]
    TooManyComponents(usize),

    #[error("component index {index} out of range for a package with {count} components")]
    NoSuchComponent { index: usize, count: usize },

    #[error(
        "firmware data request for {length} bytes at offset {offset} \
        exceeds image of {image_size} bytes"
    )]
    DataOutOfRange {
        offset: u32,
        length: u32,
        image_size: usize,
    },

    #[error("firmware data request for {length} bytes is outside the allowed 1..={max}")]
    InvalidTransferLength { length: u32, max: u32 },

    #[error("device reported {kind:?} failed with result 0x{result:02x}")]
    DeviceResult {
        kind: PendingCommandKind,
        result: u8,
    },
}
