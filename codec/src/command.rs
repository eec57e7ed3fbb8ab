// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! PLDM command requests and responses, as carried in an NC-SI payload.

use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::pldm::Header;
use ncsi_messages::Error as MessageError;

/// A PLDM request: a header followed by a command-specific body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRequest {
    pub header: Header,
    pub body: Vec<u8>,
}

impl CommandRequest {
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    /// Return `self` with a different instance ID.
    pub fn with_instance_id(mut self, instance_id: u8) -> Self {
        self.header.instance_id = instance_id & ncsi_messages::pldm::MAX_INSTANCE_ID;
        self
    }

    pub fn command(&self) -> u8 {
        self.header.command
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn size(&self) -> usize {
        Header::SIZE + self.body.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, MessageError> {
        let header = Header::parse(buf)?;
        Ok(Self {
            header,
            body: buf[Header::SIZE..].to_vec(),
        })
    }
}

/// A PLDM response: a header, completion code, and command-specific body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResponse {
    pub header: Header,
    pub completion_code: CompletionCode,
    pub body: Vec<u8>,
}

impl CommandResponse {
    /// The size of the header and completion code.
    pub const PREFIX_SIZE: usize = Header::SIZE + 1;

    /// Return a response to `request` with the given completion code and no
    /// body.
    pub fn ack(request: &Header, completion_code: CompletionCode) -> Self {
        Self {
            header: request.response(),
            completion_code,
            body: Vec::new(),
        }
    }

    pub fn command(&self) -> u8 {
        self.header.command
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn size(&self) -> usize {
        Self::PREFIX_SIZE + self.body.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.header.to_bytes());
        out.push(self.completion_code.0);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < Self::PREFIX_SIZE {
            return Err(MessageError::Truncated {
                need: Self::PREFIX_SIZE,
                have: buf.len(),
            });
        }
        let header = Header::parse(buf)?;
        Ok(Self {
            header,
            completion_code: CompletionCode(buf[Header::SIZE]),
            body: buf[Self::PREFIX_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CommandRequest;
    use super::CommandResponse;
    use ncsi_messages::pldm::Command;
    use ncsi_messages::pldm::CompletionCode;
    use ncsi_messages::pldm::Header;

    #[test]
    fn test_request_bytes() {
        let req = CommandRequest::new(Header::request(0, Command::CancelUpdate.into()), vec![])
            .with_instance_id(0x21);
        assert_eq!(req.to_bytes(), [0x81, 0x05, 0x1d]);
        assert_eq!(CommandRequest::parse(&req.to_bytes()).unwrap(), req);
    }

    #[test]
    fn test_response_parse() {
        let rsp = CommandResponse::parse(&[0x01, 0x05, 0x1a, 0x00, 0x10, 0x00]).unwrap();
        assert_eq!(rsp.command(), 0x1a);
        assert!(rsp.completion_code.is_success());
        assert_eq!(rsp.body, [0x10, 0x00]);
        assert!(CommandResponse::parse(&[0x01, 0x05, 0x1a]).is_err());

        let ack = CommandResponse::ack(
            &Header::request(3, Command::TransferComplete.into()),
            CompletionCode::SUCCESS,
        );
        assert_eq!(ack.to_bytes(), [0x03, 0x05, 0x16, 0x00]);
    }
}
