// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Transport for the vendor NC-SI driver on `NETLINK_USER` sockets.
//!
//! The driver takes its request structure as the sole payload of a netlink
//! message, and answers with its response structure the same way. It is not
//! a generic netlink family, so the framing is done here by hand.

use super::Transport;
use crate::TransportError;
use hubpack::SerializedSize;
use ncsi_messages::Error as MessageError;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use ncsi_messages::NETLINK_USER;
use nix::sys::socket::NetlinkAddr;
use nix::sys::socket::SockaddrLike;
use serde::Deserialize;
use serde::Serialize;
use slog::trace;
use slog::Logger;
use socket2::Domain;
use socket2::Protocol;
use socket2::SockAddr;
use socket2::Socket;
use socket2::Type;
use static_assertions::const_assert;
use static_assertions::const_assert_eq;
use std::io::Read;
use std::time::Duration;

const NLMSG_ERROR: u16 = 0x2;

/// Large enough for any response the driver sends.
const RECEIVE_BUFFER_SIZE: usize = 4096;

/// The header of every netlink message.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, SerializedSize)]
pub struct MessageHeader {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

const_assert_eq!(MessageHeader::MAX_SIZE, 16);

// Netlink headers are in host byte order, and hubpack is little-endian.
const_assert!(cfg!(target_endian = "little"));

/// Round `len` up to the netlink alignment of 4 bytes.
const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Encode a request frame as a complete netlink message.
pub fn encode_request(
    request: &RequestFrame,
    seq: u32,
    pid: u32,
) -> Result<Vec<u8>, TransportError> {
    let body_size = request.legacy_size();
    let size = MessageHeader::MAX_SIZE + align(body_size);
    let header = MessageHeader {
        len: size as u32,
        msg_type: 0,
        flags: 0,
        seq,
        pid,
    };
    let mut out = vec![0; size];
    hubpack::serialize(&mut out, &header).map_err(MessageError::from)?;
    let body = &mut out[MessageHeader::MAX_SIZE..][..body_size];
    request.serialize_legacy(body)?;
    Ok(out)
}

/// Parse a single netlink message, returning its header and payload.
///
/// A kernel error report is returned as [`TransportError::Netlink`] with the
/// positive errno.
fn parse_message(buf: &[u8]) -> Result<(MessageHeader, &[u8]), TransportError> {
    if buf.is_empty() {
        return Err(TransportError::Empty);
    }
    if buf.len() < MessageHeader::MAX_SIZE {
        return Err(TransportError::Malformed("short netlink header"));
    }
    let (header, _) = hubpack::deserialize::<MessageHeader>(buf).map_err(MessageError::from)?;
    let len = header.len as usize;
    if len < MessageHeader::MAX_SIZE || len > buf.len() {
        return Err(TransportError::Malformed("netlink length disagrees with message"));
    }
    let payload = &buf[MessageHeader::MAX_SIZE..len];
    if header.msg_type == NLMSG_ERROR {
        let code = payload
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(i32::from_ne_bytes)
            .ok_or(TransportError::Malformed("short netlink error"))?;
        if code == 0 {
            return Err(TransportError::Malformed("unexpected netlink acknowledgement"));
        }
        return Err(TransportError::Netlink(code.saturating_neg()));
    }
    Ok((header, payload))
}

/// Decode the driver's netlink reply into a response frame.
pub fn decode_response(buf: &[u8]) -> Result<ResponseFrame, TransportError> {
    let (_, payload) = parse_message(buf)?;
    Ok(ResponseFrame::deserialize_legacy(payload)?)
}

/// The netlink address of a unicast port, with no multicast groups.
pub fn port_address(pid: u32) -> Result<SockAddr, TransportError> {
    let addr = NetlinkAddr::new(pid, 0);
    // Safety: `try_init` provides zeroed storage large enough for any socket
    // address, and exactly `addr.len()` bytes of a valid address are copied
    // into it.
    let ((), sockaddr) = unsafe {
        SockAddr::try_init(|storage, len| {
            std::ptr::copy_nonoverlapping(
                addr.as_ptr().cast::<u8>(),
                storage.cast::<u8>(),
                addr.len() as usize,
            );
            *len = addr.len();
            Ok(())
        })
    }
    .map_err(TransportError::Socket)?;
    Ok(sockaddr)
}

// Open a socket to the driver, bound to our process ID so its reply finds
// us.
fn open(pid: u32, receive_timeout: Duration) -> Result<Socket, TransportError> {
    let socket = Socket::new(
        Domain::from(nix::libc::AF_NETLINK),
        Type::RAW,
        Some(Protocol::from(NETLINK_USER)),
    )
    .map_err(TransportError::Socket)?;
    socket
        .set_read_timeout(Some(receive_timeout))
        .map_err(TransportError::Socket)?;
    socket
        .bind(&port_address(pid)?)
        .map_err(TransportError::Socket)?;
    Ok(socket)
}

// Send a message to the kernel and receive one message in reply, returning
// the number of bytes received.
fn exchange(socket: &Socket, request: &[u8], buf: &mut [u8]) -> Result<usize, TransportError> {
    let n = socket
        .send_to(request, &port_address(0)?)
        .map_err(TransportError::Send)?;
    if n != request.len() {
        return Err(TransportError::Send(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "short netlink send",
        )));
    }
    let mut reader = socket;
    let n = reader.read(buf).map_err(TransportError::Receive)?;
    if n == 0 {
        return Err(TransportError::Empty);
    }
    Ok(n)
}

/// A transport using the legacy `NETLINK_USER` driver interface.
#[derive(Debug)]
pub struct NetlinkUser {
    receive_timeout: Duration,
    log: Logger,
    seq: u32,
}

impl NetlinkUser {
    pub fn new(receive_timeout: Duration, log: Logger) -> Self {
        Self {
            receive_timeout,
            log,
            seq: 0,
        }
    }
}

impl Transport for NetlinkUser {
    fn send(&mut self, request: &RequestFrame) -> Result<ResponseFrame, TransportError> {
        self.seq = self.seq.wrapping_add(1);
        let pid = nix::unistd::getpid().as_raw() as u32;
        let msg = encode_request(request, self.seq, pid)?;

        let socket = open(pid, self.receive_timeout)?;
        let mut buf = vec![0; RECEIVE_BUFFER_SIZE];
        let n = exchange(&socket, &msg, &mut buf)?;
        trace!(
            self.log,
            "netlink exchange";
            "seq" => self.seq,
            "sent" => msg.len(),
            "received" => n,
        );
        decode_response(&buf[..n])
    }
}
