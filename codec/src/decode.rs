// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Decode response frames from the device.

use crate::CommandRequest;
use crate::CommandResponse;
use crate::Error;
use ncsi_messages::ncsi;
use ncsi_messages::pldm::Command;
use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::pldm::PLDM_TYPE_FIRMWARE_UPDATE;
use ncsi_messages::ResponseFrame;

// Check the NC-SI status leading a response payload.
fn check_status(frame: &ResponseFrame) -> Result<(), Error> {
    let status = ncsi::Status::parse(frame.payload())?;
    if status.is_completed() {
        Ok(())
    } else {
        Err(Error::Ncsi(status))
    }
}

/// Decode the PLDM response carried in a PLDM-request or reply-send response
/// frame.
pub fn decode_response(frame: &ResponseFrame) -> Result<CommandResponse, Error> {
    check_status(frame)?;
    let rsp = CommandResponse::parse(frame.command_payload())?;
    if rsp.header.request {
        return Err(Error::NotAResponse);
    }
    if rsp.header.pldm_type != PLDM_TYPE_FIRMWARE_UPDATE {
        return Err(Error::UnexpectedPldmType(rsp.header.pldm_type));
    }
    Ok(rsp)
}

/// Decode only the completion code of a PLDM response frame.
pub fn decode_completion_code(frame: &ResponseFrame) -> Result<CompletionCode, Error> {
    decode_response(frame).map(|rsp| rsp.completion_code)
}

/// The device-initiated commands an update knows how to service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PendingCommandKind {
    RequestFirmwareData,
    TransferComplete,
    VerifyComplete,
    ApplyComplete,
}

impl PendingCommandKind {
    pub const fn command(&self) -> Command {
        match self {
            PendingCommandKind::RequestFirmwareData => Command::RequestFirmwareData,
            PendingCommandKind::TransferComplete => Command::TransferComplete,
            PendingCommandKind::VerifyComplete => Command::VerifyComplete,
            PendingCommandKind::ApplyComplete => Command::ApplyComplete,
        }
    }

    pub const fn from_command(cmd: u8) -> Option<Self> {
        match Command::from_u8(cmd) {
            Some(Command::RequestFirmwareData) => Some(PendingCommandKind::RequestFirmwareData),
            Some(Command::TransferComplete) => Some(PendingCommandKind::TransferComplete),
            Some(Command::VerifyComplete) => Some(PendingCommandKind::VerifyComplete),
            Some(Command::ApplyComplete) => Some(PendingCommandKind::ApplyComplete),
            _ => None,
        }
    }
}

/// A command the device has queued for us.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingCommand {
    pub request: CommandRequest,
}

impl PendingCommand {
    /// The PLDM command code of the request.
    pub fn command(&self) -> u8 {
        self.request.command()
    }

    /// Return the kind of command, if it's one we service.
    pub fn kind(&self) -> Option<PendingCommandKind> {
        PendingCommandKind::from_command(self.command())
    }
}

/// Decode a query-pending response into the command the device issued.
///
/// A completed response whose payload holds nothing beyond the NC-SI status
/// means the device has nothing pending, and `Ok(None)` is returned. A
/// response that did not complete is an error however short it is.
pub fn decode_pending_command(frame: &ResponseFrame) -> Result<Option<PendingCommand>, Error> {
    check_status(frame)?;
    if frame.payload_len() <= ncsi::STATUS_SIZE {
        return Ok(None);
    }
    let request = CommandRequest::parse(frame.command_payload())?;
    if request.header.pldm_type != PLDM_TYPE_FIRMWARE_UPDATE {
        return Err(Error::UnexpectedPldmType(request.header.pldm_type));
    }
    Ok(Some(PendingCommand { request }))
}
