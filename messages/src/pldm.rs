// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! PLDM message header and the firmware-update command set (DMTF DSP0267).
//!
//! All multi-byte fields are little-endian. The fixed-size prefix of each
//! command body is a plain struct serialized with `hubpack`; variable-length
//! version strings follow where the specification places them.

use crate::Error;
use core::fmt;
use hubpack::SerializedSize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;

/// The PLDM type for firmware update.
pub const PLDM_TYPE_FIRMWARE_UPDATE: u8 = 0x05;

/// The only PLDM header version defined.
pub const HEADER_VERSION: u8 = 0;

/// The largest PLDM instance ID.
pub const MAX_INSTANCE_ID: u8 = 0x1f;

const REQUEST_BIT: u8 = 0x80;
const DATAGRAM_BIT: u8 = 0x40;
const TYPE_MASK: u8 = 0x3f;

/// The common header of every PLDM message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub request: bool,
    pub datagram: bool,
    pub instance_id: u8,
    pub pldm_type: u8,
    pub command: u8,
}

impl Header {
    /// The size of the header on the wire.
    pub const SIZE: usize = 3;

    /// Return a firmware-update request header.
    pub const fn request(instance_id: u8, command: u8) -> Self {
        Self {
            request: true,
            datagram: false,
            instance_id: instance_id & MAX_INSTANCE_ID,
            pldm_type: PLDM_TYPE_FIRMWARE_UPDATE,
            command,
        }
    }

    /// Return the header of a response to `self`.
    pub const fn response(&self) -> Self {
        Self {
            request: false,
            datagram: false,
            instance_id: self.instance_id,
            pldm_type: self.pldm_type,
            command: self.command,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut first = self.instance_id & MAX_INSTANCE_ID;
        if self.request {
            first |= REQUEST_BIT;
        }
        if self.datagram {
            first |= DATAGRAM_BIT;
        }
        [
            first,
            (HEADER_VERSION << 6) | (self.pldm_type & TYPE_MASK),
            self.command,
        ]
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let Some(bytes) = buf.get(..Self::SIZE) else {
            return Err(Error::Truncated {
                need: Self::SIZE,
                have: buf.len(),
            });
        };
        Ok(Self {
            request: bytes[0] & REQUEST_BIT != 0,
            datagram: bytes[0] & DATAGRAM_BIT != 0,
            instance_id: bytes[0] & MAX_INSTANCE_ID,
            pldm_type: bytes[1] & TYPE_MASK,
            command: bytes[2],
        })
    }
}

/// Firmware-update command codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Command {
    RequestUpdate = 0x10,
    GetPackageData = 0x11,
    GetDeviceMetaData = 0x12,
    PassComponentTable = 0x13,
    UpdateComponent = 0x14,
    RequestFirmwareData = 0x15,
    TransferComplete = 0x16,
    VerifyComplete = 0x17,
    ApplyComplete = 0x18,
    GetMetaData = 0x19,
    ActivateFirmware = 0x1a,
    GetStatus = 0x1b,
    CancelUpdateComponent = 0x1c,
    CancelUpdate = 0x1d,
}

impl Command {
    pub const fn from_u8(x: u8) -> Option<Self> {
        use Command::*;
        match x {
            0x10 => Some(RequestUpdate),
            0x11 => Some(GetPackageData),
            0x12 => Some(GetDeviceMetaData),
            0x13 => Some(PassComponentTable),
            0x14 => Some(UpdateComponent),
            0x15 => Some(RequestFirmwareData),
            0x16 => Some(TransferComplete),
            0x17 => Some(VerifyComplete),
            0x18 => Some(ApplyComplete),
            0x19 => Some(GetMetaData),
            0x1a => Some(ActivateFirmware),
            0x1b => Some(GetStatus),
            0x1c => Some(CancelUpdateComponent),
            0x1d => Some(CancelUpdate),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> Self {
        c as u8
    }
}

/// A PLDM completion code.
///
/// Every response carries one. Only [`CompletionCode::SUCCESS`] means the
/// command took effect; other values are kept as-is, with a name for
/// diagnostics.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize, SerializedSize)]
pub struct CompletionCode(pub u8);

impl CompletionCode {
    pub const SUCCESS: Self = Self(0x00);
    pub const ERROR: Self = Self(0x01);
    pub const ERROR_INVALID_DATA: Self = Self(0x02);
    pub const ERROR_INVALID_LENGTH: Self = Self(0x03);
    pub const ERROR_NOT_READY: Self = Self(0x04);
    pub const ERROR_UNSUPPORTED_PLDM_CMD: Self = Self(0x05);
    pub const ERROR_INVALID_PLDM_TYPE: Self = Self(0x20);
    pub const NOT_IN_UPDATE_MODE: Self = Self(0x80);
    pub const ALREADY_IN_UPDATE_MODE: Self = Self(0x81);
    pub const DATA_OUT_OF_RANGE: Self = Self(0x82);
    pub const INVALID_TRANSFER_LENGTH: Self = Self(0x83);
    pub const INVALID_STATE_FOR_COMMAND: Self = Self(0x84);
    pub const INCOMPLETE_UPDATE: Self = Self(0x85);
    pub const BUSY_IN_BACKGROUND: Self = Self(0x86);
    pub const CANCEL_PENDING: Self = Self(0x87);
    pub const COMMAND_NOT_EXPECTED: Self = Self(0x88);
    pub const RETRY_REQUEST_FW_DATA: Self = Self(0x89);
    pub const UNABLE_TO_INITIATE_UPDATE: Self = Self(0x8a);
    pub const ACTIVATION_NOT_REQUIRED: Self = Self(0x8b);
    pub const SELF_CONTAINED_ACTIVATION_NOT_PERMITTED: Self = Self(0x8c);
    pub const NO_DEVICE_METADATA: Self = Self(0x8d);
    pub const RETRY_REQUEST_UPDATE: Self = Self(0x8e);
    pub const NO_PACKAGE_DATA: Self = Self(0x8f);
    pub const INVALID_TRANSFER_HANDLE: Self = Self(0x90);
    pub const INVALID_TRANSFER_OPERATION_FLAG: Self = Self(0x91);
    pub const ACTIVATE_PENDING_IMAGE_NOT_PERMITTED: Self = Self(0x92);
    pub const PACKAGE_DATA_ERROR: Self = Self(0x93);

    pub const fn is_success(&self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Return the name of this completion code.
    pub const fn name(&self) -> &'static str {
        match self.0 {
            0x00 => "SUCCESS",
            0x01 => "ERROR",
            0x02 => "ERROR_INVALID_DATA",
            0x03 => "ERROR_INVALID_LENGTH",
            0x04 => "ERROR_NOT_READY",
            0x05 => "ERROR_UNSUPPORTED_PLDM_CMD",
            0x20 => "ERROR_INVALID_PLDM_TYPE",
            0x80 => "NOT_IN_UPDATE_MODE",
            0x81 => "ALREADY_IN_UPDATE_MODE",
            0x82 => "DATA_OUT_OF_RANGE",
            0x83 => "INVALID_TRANSFER_LENGTH",
            0x84 => "INVALID_STATE_FOR_COMMAND",
            0x85 => "INCOMPLETE_UPDATE",
            0x86 => "BUSY_IN_BACKGROUND",
            0x87 => "CANCEL_PENDING",
            0x88 => "COMMAND_NOT_EXPECTED",
            0x89 => "RETRY_REQUEST_FW_DATA",
            0x8a => "UNABLE_TO_INITIATE_UPDATE",
            0x8b => "ACTIVATION_NOT_REQUIRED",
            0x8c => "SELF_CONTAINED_ACTIVATION_NOT_PERMITTED",
            0x8d => "NO_DEVICE_METADATA",
            0x8e => "RETRY_REQUEST_UPDATE",
            0x8f => "NO_PACKAGE_DATA",
            0x90 => "INVALID_TRANSFER_HANDLE",
            0x91 => "INVALID_TRANSFER_OPERATION_FLAG",
            0x92 => "ACTIVATE_PENDING_IMAGE_NOT_PERMITTED",
            0x93 => "PACKAGE_DATA_ERROR",
            _ => "unknown",
        }
    }
}

impl fmt::Debug for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionCode(0x{:02x}, {})", self.0, self.name())
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x} ({})", self.0, self.name())
    }
}

/// Where a PassComponentTable request falls in the sequence of components.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TransferFlag {
    Start = 0x01,
    Middle = 0x02,
    End = 0x04,
    StartAndEnd = 0x05,
}

impl TransferFlag {
    /// Return the flag for the component at `index` out of `count`.
    pub const fn for_index(index: usize, count: usize) -> Self {
        let first = index == 0;
        let last = index + 1 >= count;
        match (first, last) {
            (true, true) => TransferFlag::StartAndEnd,
            (true, false) => TransferFlag::Start,
            (false, true) => TransferFlag::End,
            (false, false) => TransferFlag::Middle,
        }
    }
}

/// The encoding of a version string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VersionStringType(pub u8);

impl VersionStringType {
    pub const UNKNOWN: Self = Self(0);
    pub const ASCII: Self = Self(1);
    pub const UTF8: Self = Self(2);
    pub const UTF16: Self = Self(3);
    pub const UTF16LE: Self = Self(4);
    pub const UTF16BE: Self = Self(5);
}

/// A typed, length-prefixed version string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionString {
    pub string_type: VersionStringType,
    bytes: Vec<u8>,
}

impl VersionString {
    pub fn new(string_type: VersionStringType, bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() > usize::from(u8::MAX) {
            return Err(Error::VersionStringTooLong(bytes.len()));
        }
        Ok(Self { string_type, bytes })
    }

    /// Construct an ASCII version string.
    pub fn ascii(s: &str) -> Result<Self, Error> {
        Self::new(VersionStringType::ASCII, s.as_bytes().to_vec())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Return the length as carried in the one-byte length field.
    pub fn len_byte(&self) -> u8 {
        // Safety: Checked at construction.
        self.bytes.len() as u8
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.string_type {
            VersionStringType::ASCII | VersionStringType::UTF8 => {
                write!(f, "{}", String::from_utf8_lossy(&self.bytes))
            }
            _ => write!(f, "{:02x?}", self.bytes),
        }
    }
}

bitflags::bitflags! {
    /// Options requested when updating a single component.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct UpdateOptionFlags: u32 {
        /// Update the component even if its comparison stamp matches.
        const FORCE_UPDATE = 0b0000_0001;
    }
}

bitflags::bitflags! {
    /// Methods by which a component's new image may be activated.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ActivationMethods: u16 {
        const AUTOMATIC             = 0b0000_0001;
        const SELF_CONTAINED        = 0b0000_0010;
        const MEDIUM_SPECIFIC_RESET = 0b0000_0100;
        const SYSTEM_REBOOT         = 0b0000_1000;
        const DC_POWER_CYCLE        = 0b0001_0000;
        const AC_POWER_CYCLE        = 0b0010_0000;
    }
}

/// Fixed portion of a RequestUpdate request. The image-set version string
/// follows.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct RequestUpdateRequest {
    pub max_transfer_size: u32,
    pub num_components: u16,
    pub max_outstanding_transfers: u8,
    pub package_data_len: u16,
}

/// Body of a RequestUpdate response.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct RequestUpdateResponse {
    pub device_metadata_len: u16,
    pub will_send_get_package_data: u8,
}

/// Fixed portion of a PassComponentTable request. The component version
/// string follows.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct PassComponentTableRequest {
    pub transfer_flag: u8,
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub comparison_stamp: u32,
}

/// Body of a PassComponentTable response.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct PassComponentTableResponse {
    pub response: u8,
    pub response_code: u8,
}

/// Fixed portion of an UpdateComponent request. The component version string
/// follows.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct UpdateComponentRequest {
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub comparison_stamp: u32,
    pub image_size: u32,
    pub update_option_flags: u32,
}

/// Body of an UpdateComponent response.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct UpdateComponentResponse {
    pub compatibility_response: u8,
    pub compatibility_response_code: u8,
    pub update_option_flags_enabled: u32,
    pub time_before_request_fw_data: u16,
}

/// A device's request for a range of the component image.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct RequestFirmwareDataRequest {
    pub offset: u32,
    pub length: u32,
}

/// A device's report that the image transfer finished.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct TransferCompleteRequest {
    pub result: u8,
}

/// A device's report that image verification finished.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct VerifyCompleteRequest {
    pub result: u8,
}

/// A device's report that the image was applied.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct ApplyCompleteRequest {
    pub result: u8,
    pub activation_methods_modification: u16,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct ActivateFirmwareRequest {
    pub self_contained_activation: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct ActivateFirmwareResponse {
    pub estimated_time_secs: u16,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct CancelUpdateResponse {
    pub non_functioning_components: bool,
    pub non_functioning_bitmap: u64,
}

// The layouts are fixed by DSP0267; make sure serialization agrees.
const_assert_eq!(RequestUpdateRequest::MAX_SIZE, 9);
const_assert_eq!(PassComponentTableRequest::MAX_SIZE, 10);
const_assert_eq!(UpdateComponentRequest::MAX_SIZE, 17);
const_assert_eq!(UpdateComponentResponse::MAX_SIZE, 8);
const_assert_eq!(RequestFirmwareDataRequest::MAX_SIZE, 8);
const_assert_eq!(ApplyCompleteRequest::MAX_SIZE, 3);
const_assert_eq!(CancelUpdateResponse::MAX_SIZE, 9);

/// Append a fixed-layout structure to `out`.
pub fn append<T: Serialize + SerializedSize>(out: &mut Vec<u8>, value: &T) -> Result<(), Error> {
    let start = out.len();
    out.resize(start + T::MAX_SIZE, 0);
    let n = hubpack::serialize(&mut out[start..], value)?;
    out.truncate(start + n);
    Ok(())
}

/// Append a version string's type and length fields to `out`.
///
/// DSP0267 places the string bytes themselves after the remaining fixed
/// fields, so they're appended separately.
pub fn append_version_header(out: &mut Vec<u8>, version: &VersionString) {
    out.push(version.string_type.0);
    out.push(version.len_byte());
}

/// Read a fixed-layout structure from the front of `buf`, returning it and
/// the remaining bytes.
pub fn read<T: DeserializeOwned + SerializedSize>(buf: &[u8]) -> Result<(T, &[u8]), Error> {
    if buf.len() < T::MAX_SIZE {
        return Err(Error::Truncated {
            need: T::MAX_SIZE,
            have: buf.len(),
        });
    }
    hubpack::deserialize(buf).map_err(Error::from)
}
