// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Request and response frames exchanged with the kernel NC-SI driver.
//!
//! A frame is the unit of exchange with a transport. The same logical frame
//! has two byte layouts, depending on which kernel interface carries it:
//!
//! - The legacy `NETLINK_USER` driver takes a C structure of the device name,
//!   channel, opcode and payload length, followed by the payload. It answers
//!   with a small header of the echoed opcode and payload length, again
//!   followed by the payload.
//! - The upstream NC-SI generic netlink family takes a full NC-SI control
//!   packet (a 16-byte header plus payload) in its `DATA` attribute, and
//!   answers with the NC-SI response packet in the same form.
//!
//! Both layouts live here so that the transports themselves only shuffle
//! bytes.

use crate::Error;
use crate::DEFAULT_DEVICE;
use crate::DEVICE_NAME_SIZE;
use crate::MAX_PAYLOAD_SIZE;
use core::fmt;
use core::str::FromStr;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;

/// The name of the network device whose NC-SI channel we address.
///
/// This is stored exactly as the kernel expects it: a fixed-size,
/// NUL-padded byte array.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct DeviceName([u8; DEVICE_NAME_SIZE]);

impl DeviceName {
    /// Construct a device name, failing if it won't fit with its terminator.
    pub fn new(name: &str) -> Result<Self, Error> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= DEVICE_NAME_SIZE || bytes.contains(&0) {
            return Err(Error::InvalidDeviceName);
        }
        let mut out = [0; DEVICE_NAME_SIZE];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Return the raw, NUL-padded field.
    pub const fn as_bytes(&self) -> &[u8; DEVICE_NAME_SIZE] {
        &self.0
    }

    /// Return the name as a string slice, without padding.
    pub fn as_str(&self) -> &str {
        let end = self
            .0
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(DEVICE_NAME_SIZE);
        // Construction only accepts `&str`, so this is always valid UTF-8.
        core::str::from_utf8(&self.0[..end]).unwrap_or_default()
    }
}

impl Default for DeviceName {
    fn default() -> Self {
        let mut out = [0; DEVICE_NAME_SIZE];
        out[..DEFAULT_DEVICE.len()].copy_from_slice(DEFAULT_DEVICE.as_bytes());
        Self(out)
    }
}

impl FromStr for DeviceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceName({:?})", self.as_str())
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Header of the legacy driver's request structure. The payload follows
// immediately.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
struct LegacyRequestHeader {
    dev_name: [u8; DEVICE_NAME_SIZE],
    channel_id: u8,
    cmd: u8,
    payload_length: u16,
}

// Header of the legacy driver's response structure. The C structure has a
// padding byte between the opcode and length.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
struct LegacyResponseHeader {
    cmd: u8,
    _pad: u8,
    payload_length: u16,
}

const_assert_eq!(LegacyRequestHeader::MAX_SIZE, 14);
const_assert_eq!(LegacyResponseHeader::MAX_SIZE, 4);

/// The size of an NC-SI control packet header.
pub const NCSI_HEADER_SIZE: usize = 16;

/// The header revision carried in every NC-SI control packet.
pub const NCSI_HEADER_REVISION: u8 = 0x01;

/// The bit set in the packet type of an NC-SI response.
pub const NCSI_RESPONSE_BIT: u8 = 0x80;

// Only the low 12 bits of the NC-SI payload length are meaningful.
const NCSI_LENGTH_MASK: u16 = 0x0fff;

/// A single request to the NC-SI driver.
///
/// The payload is held in a fixed-size buffer, so a frame never allocates and
/// can be overwritten in place between exchanges.
#[derive(Clone)]
pub struct RequestFrame {
    device: DeviceName,
    channel: u8,
    opcode: u8,
    payload_len: u16,
    payload: [u8; MAX_PAYLOAD_SIZE],
}

impl RequestFrame {
    /// Construct a new request frame.
    ///
    /// An error is returned if the payload exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn new(device: DeviceName, channel: u8, opcode: u8, payload: &[u8]) -> Result<Self, Error> {
        let mut frame = Self {
            device,
            channel,
            opcode,
            payload_len: 0,
            payload: [0; MAX_PAYLOAD_SIZE],
        };
        frame.set_payload(payload)?;
        Ok(frame)
    }

    pub fn device(&self) -> &DeviceName {
        &self.device
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Replace the payload of this frame.
    ///
    /// On error, the frame is unchanged.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        self.payload[..payload.len()].copy_from_slice(payload);
        self.payload[payload.len()..].fill(0);
        // Safety: Checked against MAX_PAYLOAD_SIZE above, which fits a u16.
        self.payload_len = payload.len() as u16;
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.payload_len)]
    }

    /// Return the number of bytes in the legacy driver layout.
    pub fn legacy_size(&self) -> usize {
        LegacyRequestHeader::MAX_SIZE + usize::from(self.payload_len)
    }

    /// Serialize into the legacy driver layout, returning the number of bytes
    /// written.
    pub fn serialize_legacy(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.legacy_size();
        if buf.len() < size {
            return Err(Error::Truncated {
                need: size,
                have: buf.len(),
            });
        }
        let header = LegacyRequestHeader {
            dev_name: *self.device.as_bytes(),
            channel_id: self.channel,
            cmd: self.opcode,
            payload_length: self.payload_len,
        };
        let n = hubpack::serialize(buf, &header)?;
        buf[n..size].copy_from_slice(self.payload());
        Ok(size)
    }

    /// Return the number of bytes in an NC-SI control packet carrying this
    /// frame.
    pub fn ncsi_packet_size(&self) -> usize {
        NCSI_HEADER_SIZE + usize::from(self.payload_len)
    }

    /// Serialize as an NC-SI control packet, returning the number of bytes
    /// written.
    ///
    /// The instance ID is left zero; the kernel assigns its own.
    pub fn serialize_ncsi_packet(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.ncsi_packet_size();
        if buf.len() < size {
            return Err(Error::Truncated {
                need: size,
                have: buf.len(),
            });
        }
        let header = &mut buf[..NCSI_HEADER_SIZE];
        header.fill(0);
        header[1] = NCSI_HEADER_REVISION;
        header[4] = self.opcode;
        header[5] = self.channel;
        header[6..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[NCSI_HEADER_SIZE..size].copy_from_slice(self.payload());
        Ok(size)
    }
}

impl fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFrame")
            .field("device", &self.device)
            .field("channel", &self.channel)
            .field("opcode", &format_args!("0x{:02x}", self.opcode))
            .field("payload", &self.payload())
            .finish()
    }
}

impl PartialEq for RequestFrame {
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device
            && self.channel == other.channel
            && self.opcode == other.opcode
            && self.payload() == other.payload()
    }
}

impl Eq for RequestFrame {}

/// A response from the NC-SI driver.
///
/// The payload is always exactly as long as the length reported by the
/// driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseFrame {
    opcode: u8,
    payload: Vec<u8>,
}

impl ResponseFrame {
    /// Construct a response from its opcode and payload.
    pub fn new(opcode: u8, payload: Vec<u8>) -> Result<Self, Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        Ok(Self { opcode, payload })
    }

    /// Construct a response from a declared payload length and the bytes
    /// actually received after the header.
    ///
    /// The received bytes may carry alignment padding past the declared
    /// length, but never fewer bytes than declared.
    pub fn from_received(opcode: u8, declared: usize, received: &[u8]) -> Result<Self, Error> {
        if declared > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(declared));
        }
        if declared > received.len() {
            return Err(Error::LengthMismatch {
                declared,
                received: received.len(),
            });
        }
        Ok(Self {
            opcode,
            payload: received[..declared].to_vec(),
        })
    }

    /// Deserialize a response in the legacy driver layout.
    pub fn deserialize_legacy(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < LegacyResponseHeader::MAX_SIZE {
            return Err(Error::Truncated {
                need: LegacyResponseHeader::MAX_SIZE,
                have: buf.len(),
            });
        }
        let (header, rest) = hubpack::deserialize::<LegacyResponseHeader>(buf)?;
        Self::from_received(header.cmd, usize::from(header.payload_length), rest)
    }

    /// Deserialize an NC-SI response packet.
    ///
    /// The opcode is reported as the command it responds to, i.e., with the
    /// response bit cleared.
    pub fn deserialize_ncsi_packet(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < NCSI_HEADER_SIZE {
            return Err(Error::Truncated {
                need: NCSI_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let opcode = buf[4] & !NCSI_RESPONSE_BIT;
        let declared = u16::from_be_bytes([buf[6], buf[7]]) & NCSI_LENGTH_MASK;
        Self::from_received(opcode, usize::from(declared), &buf[NCSI_HEADER_SIZE..])
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Return the bytes following the NC-SI response and reason codes, if
    /// any.
    pub fn command_payload(&self) -> &[u8] {
        self.payload
            .get(crate::ncsi::STATUS_SIZE..)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceName;
    use super::RequestFrame;
    use super::ResponseFrame;
    use super::NCSI_HEADER_SIZE;
    use crate::Error;
    use crate::MAX_PAYLOAD_SIZE;

    #[test]
    fn test_device_name() {
        assert_eq!(DeviceName::new("eth1").unwrap().as_str(), "eth1");
        assert_eq!(DeviceName::default().as_str(), "eth0");
        assert_eq!(
            DeviceName::new("123456789").unwrap().as_bytes()[9],
            0,
            "name must keep a trailing NUL"
        );
        assert_eq!(DeviceName::new(""), Err(Error::InvalidDeviceName));
        assert_eq!(DeviceName::new("0123456789"), Err(Error::InvalidDeviceName));
        assert_eq!(DeviceName::new("et\0h"), Err(Error::InvalidDeviceName));
    }

    #[test]
    fn test_request_frame_payload_bounds() {
        let dev = DeviceName::default();
        let big = vec![0; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            RequestFrame::new(dev, 0, 0x51, &big).unwrap_err(),
            Error::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1)
        );

        let mut frame = RequestFrame::new(dev, 0, 0x51, &[1, 2, 3]).unwrap();
        assert!(frame.set_payload(&big).is_err());
        assert_eq!(frame.payload(), &[1, 2, 3]);
        frame.set_payload(&[9]).unwrap();
        assert_eq!(frame.payload(), &[9]);
    }

    #[test]
    fn test_legacy_request_layout() {
        let frame = RequestFrame::new(DeviceName::new("eth2").unwrap(), 3, 0x51, &[0xaa, 0xbb])
            .unwrap();
        let mut buf = [0xff; 32];
        let n = frame.serialize_legacy(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..4], b"eth2");
        assert_eq!(&buf[4..10], &[0; 6]);
        assert_eq!(buf[10], 3);
        assert_eq!(buf[11], 0x51);
        assert_eq!(&buf[12..14], &2u16.to_le_bytes());
        assert_eq!(&buf[14..16], &[0xaa, 0xbb]);

        let mut short = [0; 15];
        assert!(matches!(
            frame.serialize_legacy(&mut short),
            Err(Error::Truncated { need: 16, have: 15 })
        ));
    }

    #[test]
    fn test_legacy_response_layout() {
        let mut buf = vec![0x56, 0x00];
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0, 0x81, 0x05]);
        // Trailing alignment padding is tolerated.
        buf.extend_from_slice(&[0, 0]);
        let rsp = ResponseFrame::deserialize_legacy(&buf).unwrap();
        assert_eq!(rsp.opcode(), 0x56);
        assert_eq!(rsp.payload(), &[0, 0, 0, 0, 0x81, 0x05]);
        assert_eq!(rsp.command_payload(), &[0x81, 0x05]);
    }

    #[test]
    fn test_legacy_response_short_read() {
        let mut buf = vec![0x51, 0x00];
        buf.extend_from_slice(&10u16.to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        assert_eq!(
            ResponseFrame::deserialize_legacy(&buf),
            Err(Error::LengthMismatch {
                declared: 10,
                received: 4
            })
        );
        assert!(matches!(
            ResponseFrame::deserialize_legacy(&[0x51]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_ncsi_packet_layout() {
        let frame = RequestFrame::new(DeviceName::default(), 1, 0x57, &[1, 2, 3]).unwrap();
        let mut buf = [0; 64];
        let n = frame.serialize_ncsi_packet(&mut buf).unwrap();
        assert_eq!(n, NCSI_HEADER_SIZE + 3);
        assert_eq!(buf[1], 0x01);
        assert_eq!(buf[4], 0x57);
        assert_eq!(buf[5], 1);
        assert_eq!(&buf[6..8], &[0x00, 0x03]);
        assert_eq!(&buf[NCSI_HEADER_SIZE..n], &[1, 2, 3]);

        // Shape the same bytes into a response and read them back.
        buf[4] |= 0x80;
        let rsp = ResponseFrame::deserialize_ncsi_packet(&buf[..n + 4]).unwrap();
        assert_eq!(rsp.opcode(), 0x57);
        assert_eq!(rsp.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_ncsi_packet_length_mask() {
        let mut buf = [0; NCSI_HEADER_SIZE + 2];
        buf[4] = 0xd6;
        buf[6] = 0xf0;
        buf[7] = 0x02;
        let rsp = ResponseFrame::deserialize_ncsi_packet(&buf).unwrap();
        assert_eq!(rsp.opcode(), 0x56);
        assert_eq!(rsp.payload_len(), 2);
    }
}
