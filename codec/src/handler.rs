// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Compute our replies to the commands a device issues during transfer.
//!
//! Once a component update starts, the device drives: it asks for ranges of
//! the image, then reports that the transfer, verification and application
//! finished. Every such command gets a reply, even when we can't honor it,
//! so the device is never left waiting on us. Whether the command also means
//! the update has failed is reported separately, in [`Reply::status`].

use crate::CommandRequest;
use crate::CommandResponse;
use crate::Error;
use crate::Package;
use crate::PendingCommandKind;
use crate::MAX_FIRMWARE_DATA;
use ncsi_messages::pldm;
use ncsi_messages::pldm::ApplyCompleteRequest;
use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::pldm::RequestFirmwareDataRequest;
use ncsi_messages::pldm::TransferCompleteRequest;
use ncsi_messages::pldm::VerifyCompleteRequest;

/// State carried across the pending commands of a single update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferContext {
    component: usize,
    max_transfer_size: u32,
    bytes_served: u64,
}

impl TransferContext {
    /// Start a transfer at the first component, honoring data requests of
    /// up to `max_transfer_size` bytes.
    pub fn new(max_transfer_size: u32) -> Self {
        Self {
            component: 0,
            max_transfer_size,
            bytes_served: 0,
        }
    }

    /// The index of the component whose image is being transferred.
    pub fn component(&self) -> usize {
        self.component
    }

    /// The total number of image bytes handed to the device.
    pub fn bytes_served(&self) -> u64 {
        self.bytes_served
    }

    fn max_request_len(&self) -> u32 {
        self.max_transfer_size.min(MAX_FIRMWARE_DATA as u32)
    }
}

/// The reply to a device-initiated command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    /// The response to send back to the device.
    pub response: CommandResponse,
    /// Whether the command leaves the update in good standing.
    pub status: Result<(), Error>,
}

impl Reply {
    fn ok(response: CommandResponse) -> Self {
        Self {
            response,
            status: Ok(()),
        }
    }

    fn failed(response: CommandResponse, err: Error) -> Self {
        Self {
            response,
            status: Err(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Compute the reply to a pending command of the given kind.
pub fn handle_pending_command<P: Package + ?Sized>(
    package: &P,
    ctx: &mut TransferContext,
    kind: PendingCommandKind,
    request: &CommandRequest,
) -> Reply {
    match kind {
        PendingCommandKind::RequestFirmwareData => firmware_data(package, ctx, request),
        PendingCommandKind::TransferComplete => {
            let reply = completion::<TransferCompleteRequest>(request, kind, |r| r.result);
            if ctx.component + 1 < package.component_count() {
                ctx.component += 1;
            }
            reply
        }
        PendingCommandKind::VerifyComplete => {
            completion::<VerifyCompleteRequest>(request, kind, |r| r.result)
        }
        PendingCommandKind::ApplyComplete => {
            completion::<ApplyCompleteRequest>(request, kind, |r| r.result)
        }
    }
}

fn firmware_data<P: Package + ?Sized>(
    package: &P,
    ctx: &mut TransferContext,
    request: &CommandRequest,
) -> Reply {
    let req = match pldm::read::<RequestFirmwareDataRequest>(&request.body) {
        Ok((req, _)) => req,
        Err(e) => {
            return Reply::failed(
                CommandResponse::ack(&request.header, CompletionCode::ERROR_INVALID_LENGTH),
                e.into(),
            );
        }
    };

    let max = ctx.max_request_len();
    if req.length == 0 || req.length > max {
        return Reply::failed(
            CommandResponse::ack(&request.header, CompletionCode::INVALID_TRANSFER_LENGTH),
            Error::InvalidTransferLength {
                length: req.length,
                max,
            },
        );
    }

    let image = package.component_image(ctx.component).unwrap_or_default();
    let start = req.offset as usize;
    let range = start
        .checked_add(req.length as usize)
        .and_then(|end| image.get(start..end));
    let Some(data) = range else {
        return Reply::failed(
            CommandResponse::ack(&request.header, CompletionCode::DATA_OUT_OF_RANGE),
            Error::DataOutOfRange {
                offset: req.offset,
                length: req.length,
                image_size: image.len(),
            },
        );
    };

    ctx.bytes_served += data.len() as u64;
    let mut response = CommandResponse::ack(&request.header, CompletionCode::SUCCESS);
    response.body = data.to_vec();
    Reply::ok(response)
}

// Acknowledge a device's report that some stage completed, and check the
// result it reported.
fn completion<T>(
    request: &CommandRequest,
    kind: PendingCommandKind,
    result: impl Fn(&T) -> u8,
) -> Reply
where
    T: serde::de::DeserializeOwned + hubpack::SerializedSize,
{
    match pldm::read::<T>(&request.body) {
        Ok((body, _)) => {
            let response = CommandResponse::ack(&request.header, CompletionCode::SUCCESS);
            match result(&body) {
                0 => Reply::ok(response),
                result => Reply::failed(response, Error::DeviceResult { kind, result }),
            }
        }
        Err(e) => Reply::failed(
            CommandResponse::ack(&request.header, CompletionCode::ERROR_INVALID_LENGTH),
            e.into(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::tests::build_package;
    use crate::FirmwarePackage;
    use ncsi_messages::pldm::Command;
    use ncsi_messages::pldm::Header;

    fn package() -> FirmwarePackage {
        let first: Vec<u8> = (0..=255).collect();
        FirmwarePackage::parse(build_package(&[&first, &[0xee; 10]])).unwrap()
    }

    fn data_request(offset: u32, length: u32) -> CommandRequest {
        let mut body = offset.to_le_bytes().to_vec();
        body.extend_from_slice(&length.to_le_bytes());
        CommandRequest::new(
            Header::request(6, Command::RequestFirmwareData.into()),
            body,
        )
    }

    fn complete(cmd: Command, body: &[u8]) -> CommandRequest {
        CommandRequest::new(Header::request(2, cmd.into()), body.to_vec())
    }

    #[test]
    fn test_firmware_data_in_range() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::RequestFirmwareData,
            &data_request(16, 8),
        );
        assert!(reply.is_ok());
        assert_eq!(
            reply.response.to_bytes(),
            [0x06, 0x05, 0x15, 0x00, 16, 17, 18, 19, 20, 21, 22, 23]
        );
        assert_eq!(ctx.bytes_served(), 8);

        // The last byte of the image.
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::RequestFirmwareData,
            &data_request(255, 1),
        );
        assert_eq!(reply.response.body, [255]);
        assert_eq!(ctx.bytes_served(), 9);
    }

    #[test]
    fn test_firmware_data_out_of_range() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        for (offset, length) in [(250, 8), (256, 1), (u32::MAX, 4)] {
            let reply = handle_pending_command(
                &pkg,
                &mut ctx,
                PendingCommandKind::RequestFirmwareData,
                &data_request(offset, length),
            );
            assert_eq!(
                reply.response.completion_code,
                CompletionCode::DATA_OUT_OF_RANGE
            );
            assert!(reply.response.body.is_empty());
            assert_eq!(
                reply.status,
                Err(Error::DataOutOfRange {
                    offset,
                    length,
                    image_size: 256
                })
            );
        }
        assert_eq!(ctx.bytes_served(), 0);
    }

    #[test]
    fn test_firmware_data_invalid_length() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        for length in [0, 65] {
            let reply = handle_pending_command(
                &pkg,
                &mut ctx,
                PendingCommandKind::RequestFirmwareData,
                &data_request(0, length),
            );
            assert_eq!(
                reply.response.completion_code,
                CompletionCode::INVALID_TRANSFER_LENGTH
            );
            assert_eq!(
                reply.status,
                Err(Error::InvalidTransferLength { length, max: 64 })
            );
        }

        // A short body can't be serviced at all.
        let mut req = data_request(0, 4);
        req.body.truncate(6);
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::RequestFirmwareData,
            &req,
        );
        assert_eq!(
            reply.response.completion_code,
            CompletionCode::ERROR_INVALID_LENGTH
        );
        assert!(matches!(reply.status, Err(Error::Message(_))));
    }

    #[test]
    fn test_transfer_complete_advances_component() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::TransferComplete,
            &complete(Command::TransferComplete, &[0]),
        );
        assert!(reply.is_ok());
        assert_eq!(reply.response.to_bytes(), [0x02, 0x05, 0x16, 0x00]);
        assert_eq!(ctx.component(), 1);

        // Data now comes from the second image.
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::RequestFirmwareData,
            &data_request(8, 2),
        );
        assert_eq!(reply.response.body, [0xee, 0xee]);

        // The cursor never runs past the last component.
        handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::TransferComplete,
            &complete(Command::TransferComplete, &[0]),
        );
        assert_eq!(ctx.component(), 1);
    }

    #[test]
    fn test_completion_device_failure() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::VerifyComplete,
            &complete(Command::VerifyComplete, &[0x01]),
        );
        // Acknowledged, but the update can't go on.
        assert!(reply.response.completion_code.is_success());
        assert_eq!(
            reply.status,
            Err(Error::DeviceResult {
                kind: PendingCommandKind::VerifyComplete,
                result: 1
            })
        );
    }

    #[test]
    fn test_apply_complete() {
        let pkg = package();
        let mut ctx = TransferContext::new(64);
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::ApplyComplete,
            &complete(Command::ApplyComplete, &[0x00, 0x00, 0x00]),
        );
        assert!(reply.is_ok());
        assert_eq!(reply.response.command(), 0x18);

        // ApplyComplete carries more than a result byte.
        let reply = handle_pending_command(
            &pkg,
            &mut ctx,
            PendingCommandKind::ApplyComplete,
            &complete(Command::ApplyComplete, &[0x00]),
        );
        assert!(!reply.is_ok());
    }
}
