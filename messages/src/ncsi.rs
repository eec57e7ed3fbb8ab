// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! NC-SI command opcodes and response status, per DMTF DSP0222.

use crate::Error;
use core::fmt;

/// NC-SI command opcodes used by this crate.
pub mod opcode {
    pub const GET_CONTROLLER_PACKET_STATISTICS: u8 = 0x18;
    pub const PLDM_REQUEST: u8 = 0x51;
    pub const QUERY_PENDING_NC_PLDM_REQUEST: u8 = 0x56;
    pub const SEND_NC_PLDM_REPLY: u8 = 0x57;
    /// Not an NC-SI command: the vendor driver echoes it to exercise the
    /// socket path.
    pub const SOCKET_TEST: u8 = 0xde;
}

/// The size of the response and reason codes leading every NC-SI response
/// payload.
pub const STATUS_SIZE: usize = 4;

/// The NC-SI response code of a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    Completed,
    Failed,
    Unavailable,
    Unsupported,
    Other(u16),
}

impl From<u16> for ResponseCode {
    fn from(x: u16) -> Self {
        match x {
            0x0000 => ResponseCode::Completed,
            0x0001 => ResponseCode::Failed,
            0x0002 => ResponseCode::Unavailable,
            0x0003 => ResponseCode::Unsupported,
            other => ResponseCode::Other(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Completed => write!(f, "Command Completed"),
            ResponseCode::Failed => write!(f, "Command Failed"),
            ResponseCode::Unavailable => write!(f, "Command Unavailable"),
            ResponseCode::Unsupported => write!(f, "Command Unsupported"),
            ResponseCode::Other(x) => write!(f, "Unknown (0x{x:04x})"),
        }
    }
}

/// The NC-SI reason code qualifying a response code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReasonCode {
    NoError,
    InterfaceInitRequired,
    ParameterInvalid,
    ChannelNotReady,
    PackageNotReady,
    InvalidPayloadLength,
    UnsupportedCommand,
    Other(u16),
}

impl From<u16> for ReasonCode {
    fn from(x: u16) -> Self {
        match x {
            0x0000 => ReasonCode::NoError,
            0x0001 => ReasonCode::InterfaceInitRequired,
            0x0002 => ReasonCode::ParameterInvalid,
            0x0003 => ReasonCode::ChannelNotReady,
            0x0004 => ReasonCode::PackageNotReady,
            0x0005 => ReasonCode::InvalidPayloadLength,
            0x7fff => ReasonCode::UnsupportedCommand,
            other => ReasonCode::Other(other),
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::NoError => write!(f, "No Error"),
            ReasonCode::InterfaceInitRequired => write!(f, "Interface Init Required"),
            ReasonCode::ParameterInvalid => write!(f, "Parameter Is Invalid"),
            ReasonCode::ChannelNotReady => write!(f, "Channel Not Ready"),
            ReasonCode::PackageNotReady => write!(f, "Package Not Ready"),
            ReasonCode::InvalidPayloadLength => write!(f, "Invalid Payload Length"),
            ReasonCode::UnsupportedCommand => write!(f, "Unsupported Command Type"),
            ReasonCode::Other(x) => write!(f, "Unknown (0x{x:04x})"),
        }
    }
}

/// The status leading an NC-SI response payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Status {
    pub response: ResponseCode,
    pub reason: ReasonCode,
}

impl Status {
    /// Parse the status from the start of a response payload.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let Some(bytes) = payload.get(..STATUS_SIZE) else {
            return Err(Error::Truncated {
                need: STATUS_SIZE,
                have: payload.len(),
            });
        };
        Ok(Self {
            response: u16::from_be_bytes([bytes[0], bytes[1]]).into(),
            reason: u16::from_be_bytes([bytes[2], bytes[3]]).into(),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.response == ResponseCode::Completed
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.response, self.reason)
    }
}
