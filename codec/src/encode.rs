// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Encode the requests an update sends to the device, and wrap requests and
//! replies in NC-SI frames.

use crate::CommandRequest;
use crate::CommandResponse;
use crate::ComponentInfo;
use crate::Error;
use crate::Package;
use ncsi_messages::ncsi::opcode;
use ncsi_messages::pldm;
use ncsi_messages::pldm::ActivateFirmwareRequest;
use ncsi_messages::pldm::Command;
use ncsi_messages::pldm::Header;
use ncsi_messages::pldm::PassComponentTableRequest;
use ncsi_messages::pldm::RequestUpdateRequest;
use ncsi_messages::pldm::TransferFlag;
use ncsi_messages::pldm::UpdateComponentRequest;
use ncsi_messages::pldm::UpdateOptionFlags;
use ncsi_messages::DeviceName;
use ncsi_messages::RequestFrame;

// We only ever have one transfer in flight.
const MAX_OUTSTANDING_TRANSFERS: u8 = 1;

fn component<P: Package + ?Sized>(package: &P, index: usize) -> Result<&ComponentInfo, Error> {
    package.component(index).ok_or(Error::NoSuchComponent {
        index,
        count: package.component_count(),
    })
}

/// Encode a RequestUpdate, offering the device `max_transfer_size` bytes per
/// firmware data request.
pub fn encode_request_update<P: Package + ?Sized>(
    package: &P,
    max_transfer_size: u32,
) -> Result<CommandRequest, Error> {
    let count = package.component_count();
    let num_components = u16::try_from(count).map_err(|_| Error::TooManyComponents(count))?;
    let version = package.image_set_version();

    let mut body = Vec::new();
    pldm::append(
        &mut body,
        &RequestUpdateRequest {
            max_transfer_size,
            num_components,
            max_outstanding_transfers: MAX_OUTSTANDING_TRANSFERS,
            package_data_len: package.package_data_len(),
        },
    )?;
    pldm::append_version_header(&mut body, version);
    body.extend_from_slice(version.bytes());
    Ok(CommandRequest::new(
        Header::request(0, Command::RequestUpdate.into()),
        body,
    ))
}

/// Encode the PassComponentTable entry for the component at `index`.
pub fn encode_pass_component_table<P: Package + ?Sized>(
    package: &P,
    index: usize,
) -> Result<CommandRequest, Error> {
    let info = component(package, index)?;
    let flag = TransferFlag::for_index(index, package.component_count());

    let mut body = Vec::new();
    pldm::append(
        &mut body,
        &PassComponentTableRequest {
            transfer_flag: flag as u8,
            classification: info.classification,
            identifier: info.identifier,
            classification_index: info.classification_index,
            comparison_stamp: info.comparison_stamp,
        },
    )?;
    pldm::append_version_header(&mut body, &info.version);
    body.extend_from_slice(info.version.bytes());
    Ok(CommandRequest::new(
        Header::request(0, Command::PassComponentTable.into()),
        body,
    ))
}

/// Encode the UpdateComponent request for the component at `index`.
pub fn encode_update_component<P: Package + ?Sized>(
    package: &P,
    index: usize,
) -> Result<CommandRequest, Error> {
    let info = component(package, index)?;
    let image_size = package.component_image(index).map_or(0, <[u8]>::len);
    let mut flags = UpdateOptionFlags::empty();
    if info.options & ComponentInfo::OPTION_FORCE_UPDATE != 0 {
        flags |= UpdateOptionFlags::FORCE_UPDATE;
    }

    let mut body = Vec::new();
    pldm::append(
        &mut body,
        &UpdateComponentRequest {
            classification: info.classification,
            identifier: info.identifier,
            classification_index: info.classification_index,
            comparison_stamp: info.comparison_stamp,
            image_size: image_size as u32,
            update_option_flags: flags.bits(),
        },
    )?;
    pldm::append_version_header(&mut body, &info.version);
    body.extend_from_slice(info.version.bytes());
    Ok(CommandRequest::new(
        Header::request(0, Command::UpdateComponent.into()),
        body,
    ))
}

/// Encode an ActivateFirmware request.
///
/// Self-contained activation is never requested; the new image takes effect
/// by whatever activation method the device reported.
pub fn encode_activate_firmware() -> Result<CommandRequest, Error> {
    let mut body = Vec::new();
    pldm::append(
        &mut body,
        &ActivateFirmwareRequest {
            self_contained_activation: false,
        },
    )?;
    Ok(CommandRequest::new(
        Header::request(0, Command::ActivateFirmware.into()),
        body,
    ))
}

/// Encode a CancelUpdate request.
pub fn encode_cancel_update() -> CommandRequest {
    CommandRequest::new(Header::request(0, Command::CancelUpdate.into()), Vec::new())
}

/// Wrap a PLDM request in an NC-SI PLDM-request frame.
pub fn request_frame(
    device: DeviceName,
    channel: u8,
    request: &CommandRequest,
) -> Result<RequestFrame, Error> {
    Ok(RequestFrame::new(
        device,
        channel,
        opcode::PLDM_REQUEST,
        &request.to_bytes(),
    )?)
}

/// Build the NC-SI frame that asks the device for its next pending command.
pub fn query_pending_frame(device: DeviceName, channel: u8) -> Result<RequestFrame, Error> {
    Ok(RequestFrame::new(
        device,
        channel,
        opcode::QUERY_PENDING_NC_PLDM_REQUEST,
        &[],
    )?)
}

/// Wrap our reply to a device-initiated command in an NC-SI reply frame.
pub fn reply_frame(
    device: DeviceName,
    channel: u8,
    reply: &CommandResponse,
) -> Result<RequestFrame, Error> {
    Ok(RequestFrame::new(
        device,
        channel,
        opcode::SEND_NC_PLDM_REPLY,
        &reply.to_bytes(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_response;
    use crate::package::tests::build_package;
    use crate::FirmwarePackage;
    use ncsi_messages::pldm::CompletionCode;
    use ncsi_messages::ResponseFrame;

    fn package() -> FirmwarePackage {
        FirmwarePackage::parse(build_package(&[&[0x11; 300], &[0x22; 20], &[0x33; 5]])).unwrap()
    }

    #[test]
    fn test_encode_request_update() {
        let pkg = package();
        let req = encode_request_update(&pkg, 1024).unwrap();
        assert_eq!(req.command(), 0x10);
        let mut expected = vec![0x00, 0x04, 0x00, 0x00, 0x03, 0x00, 0x01, 0x02, 0x00, 0x01, 9];
        expected.extend_from_slice(b"NIC 1.2.3");
        assert_eq!(req.body, expected);
    }

    #[test]
    fn test_encode_pass_component_table_flags() {
        let pkg = package();
        let flags: Vec<u8> = (0..3)
            .map(|i| encode_pass_component_table(&pkg, i).unwrap().body[0])
            .collect();
        assert_eq!(flags, [0x01, 0x02, 0x04]);

        let req = encode_pass_component_table(&pkg, 1).unwrap();
        assert_eq!(req.command(), 0x13);
        assert_eq!(&req.body[1..5], &[0x0a, 0x00, 0x01, 0x01]);
        assert_eq!(&req.body[6..10], &0x1001u32.to_le_bytes());
        assert_eq!(&req.body[10..12], &[0x01, 4]);
        assert_eq!(&req.body[12..], b"fw-9");

        assert_eq!(
            encode_pass_component_table(&pkg, 3),
            Err(Error::NoSuchComponent { index: 3, count: 3 })
        );
    }

    #[test]
    fn test_encode_update_component() {
        let pkg = package();
        let req = encode_update_component(&pkg, 0).unwrap();
        assert_eq!(req.command(), 0x14);
        // Image size.
        assert_eq!(&req.body[9..13], &300u32.to_le_bytes());
        // Force update, from the component options.
        assert_eq!(&req.body[13..17], &1u32.to_le_bytes());
        assert_eq!(&req.body[19..], b"fw-9");
        assert!(encode_update_component(&pkg, 7).is_err());
    }

    #[test]
    fn test_encode_fixed_requests() {
        assert_eq!(
            encode_activate_firmware().unwrap().to_bytes(),
            [0x80, 0x05, 0x1a, 0x00]
        );
        assert_eq!(encode_cancel_update().to_bytes(), [0x80, 0x05, 0x1d]);
    }

    #[test]
    fn test_request_frame_round_trip() {
        let pkg = package();
        let dev = DeviceName::new("eth1").unwrap();
        let req = encode_update_component(&pkg, 2)
            .unwrap()
            .with_instance_id(9);
        let frame = request_frame(dev, 2, &req).unwrap();
        assert_eq!(frame.opcode(), opcode::PLDM_REQUEST);
        assert_eq!(frame.channel(), 2);
        assert_eq!(frame.payload().len(), req.size());

        // Synthesize the device's answer from the bytes we sent.
        let sent = CommandRequest::parse(frame.payload()).unwrap();
        let reply = CommandResponse::ack(&sent.header, CompletionCode::SUCCESS);
        let mut payload = vec![0; 4];
        payload.extend_from_slice(&reply.to_bytes());
        let rsp = ResponseFrame::new(frame.opcode(), payload).unwrap();

        let decoded = decode_response(&rsp).unwrap();
        assert_eq!(decoded.command(), req.command());
        assert_eq!(decoded.header.instance_id, 9);
        assert_eq!(sent.body_size(), req.body_size());
    }

    #[test]
    fn test_query_and_reply_frames() {
        let dev = DeviceName::default();
        let q = query_pending_frame(dev, 0).unwrap();
        assert_eq!(q.opcode(), opcode::QUERY_PENDING_NC_PLDM_REQUEST);
        assert!(q.payload().is_empty());

        let ack = CommandResponse::ack(
            &Header::request(4, Command::VerifyComplete.into()),
            CompletionCode::SUCCESS,
        );
        let r = reply_frame(dev, 0, &ack).unwrap();
        assert_eq!(r.opcode(), opcode::SEND_NC_PLDM_REPLY);
        assert_eq!(r.payload(), &[0x04, 0x05, 0x17, 0x00]);
    }
}
