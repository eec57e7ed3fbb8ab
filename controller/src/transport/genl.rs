// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Transport for the upstream NC-SI driver's generic netlink family.

use super::Transport;
use crate::TransportError;
use core::fmt;
use ncsi_messages::DeviceName;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use neli::consts::genl::Cmd;
use neli::consts::genl::NlAttrType;
use neli::consts::nl::NlmF;
use neli::consts::nl::NlmFFlags;
use neli::consts::socket::NlFamily;
use neli::err::NlError;
use neli::genl::Genlmsghdr;
use neli::genl::Nlattr;
use neli::neli_enum;
use neli::nl::NlPayload;
use neli::nl::Nlmsghdr;
use neli::socket::NlSocketHandle;
use neli::types::Buffer;
use neli::types::GenlBuffer;
use nix::net::if_::if_nametoindex;
use slog::debug;
use slog::trace;
use slog::Logger;
use socket2::SockRef;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::time::Duration;

/// The name of the NC-SI generic netlink family.
pub const NCSI_FAMILY_NAME: &str = "NCSI";

// All channels we address live on the first package.
const PACKAGE_ID: u32 = 0;

/// Commands of the NC-SI family.
#[neli_enum(serialized_type = "u8")]
pub enum NcsiCmd {
    Unspec = 0,
    PkgInfo = 1,
    SetInterface = 2,
    ClearInterface = 3,
    SendCmd = 4,
}

impl Cmd for NcsiCmd {}

/// Attributes of the NC-SI family.
#[neli_enum(serialized_type = "u16")]
pub enum NcsiAttr {
    Unspec = 0,
    Ifindex = 1,
    PackageList = 2,
    PackageId = 3,
    ChannelId = 4,
    Data = 5,
}

impl NlAttrType for NcsiAttr {}

/// A message of the NC-SI family.
pub type NcsiMessage = Nlmsghdr<u16, Genlmsghdr<NcsiCmd, NcsiAttr>>;

// A kernel error report keeps its errno; anything else the library reports
// is carried as text.
fn netlink_error<T, P>(err: NlError<T, P>) -> TransportError
where
    NlError<T, P>: fmt::Display,
{
    match err {
        NlError::Nlmsgerr(e) => TransportError::Netlink(e.error.saturating_neg()),
        e => TransportError::Library(e.to_string()),
    }
}

fn attr<P>(attr_type: NcsiAttr, payload: P) -> Result<Nlattr<NcsiAttr, Buffer>, TransportError>
where
    P: neli::Size + neli::ToBytes,
{
    Nlattr::new(false, false, attr_type, payload)
        .map_err(|e| TransportError::Library(e.to_string()))
}

/// Encode a request frame as an NC-SI send-command message.
pub fn encode_request(
    request: &RequestFrame,
    family: u16,
    ifindex: u32,
) -> Result<NcsiMessage, TransportError> {
    let mut packet = vec![0; request.ncsi_packet_size()];
    request.serialize_ncsi_packet(&mut packet)?;

    let mut attrs = GenlBuffer::new();
    attrs.push(attr(NcsiAttr::Ifindex, ifindex)?);
    attrs.push(attr(NcsiAttr::PackageId, PACKAGE_ID)?);
    attrs.push(attr(NcsiAttr::ChannelId, u32::from(request.channel()))?);
    attrs.push(attr(NcsiAttr::Data, Buffer::from(packet))?);
    Ok(Nlmsghdr::new(
        None,
        family,
        NlmFFlags::new(&[NlmF::Request]),
        None,
        None,
        NlPayload::Payload(Genlmsghdr::new(NcsiCmd::SendCmd, 0, attrs)),
    ))
}

/// Decode the driver's reply into a response frame.
pub fn decode_response(msg: &NcsiMessage) -> Result<ResponseFrame, TransportError> {
    let genl = msg.get_payload().map_err(netlink_error)?;
    let handle = genl.get_attr_handle();
    let data = handle
        .get_attribute(NcsiAttr::Data)
        .ok_or(TransportError::Malformed("response has no data attribute"))?;
    Ok(ResponseFrame::deserialize_ncsi_packet(data.nla_payload.as_ref())?)
}

// Open a generic netlink socket whose receives give up after `timeout`.
fn open(timeout: Duration) -> Result<NlSocketHandle, TransportError> {
    let socket =
        NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(TransportError::Socket)?;
    // Safety: the descriptor belongs to `socket`, which outlives this borrow.
    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    SockRef::from(&fd)
        .set_read_timeout(Some(timeout))
        .map_err(TransportError::Socket)?;
    Ok(socket)
}

/// A transport using the `NCSI` generic netlink family.
///
/// The family ID and interface index are resolved once, at construction.
#[derive(Debug)]
pub struct GenericNetlink {
    family: u16,
    ifindex: u32,
    receive_timeout: Duration,
    log: Logger,
}

impl GenericNetlink {
    /// Create a transport addressing the NC-SI channels of `device`.
    pub fn new(
        device: &DeviceName,
        receive_timeout: Duration,
        log: Logger,
    ) -> Result<Self, TransportError> {
        let ifindex = if_nametoindex(device.as_str()).map_err(|err| TransportError::Interface {
            name: device.to_string(),
            err,
        })?;
        let mut socket = open(receive_timeout)?;
        let family = socket
            .resolve_genl_family(NCSI_FAMILY_NAME)
            .map_err(|e| match netlink_error(e) {
                TransportError::Netlink(nix::libc::ENOENT) => {
                    TransportError::UnknownFamily(NCSI_FAMILY_NAME)
                }
                e => e,
            })?;
        debug!(
            log,
            "resolved NC-SI netlink family";
            "family" => family,
            "device" => %device,
            "ifindex" => ifindex,
        );
        Ok(Self {
            family,
            ifindex,
            receive_timeout,
            log,
        })
    }
}

impl Transport for GenericNetlink {
    fn send(&mut self, request: &RequestFrame) -> Result<ResponseFrame, TransportError> {
        let msg = encode_request(request, self.family, self.ifindex)?;
        let mut socket = open(self.receive_timeout)?;
        socket.send(msg).map_err(|e| netlink_error(NlError::<u16, Genlmsghdr<NcsiCmd, NcsiAttr>>::from(e)))?;
        let rsp: NcsiMessage = socket
            .recv()
            .map_err(netlink_error)?
            .ok_or(TransportError::Empty)?;
        trace!(
            self.log,
            "netlink exchange";
            "opcode" => request.opcode(),
            "received" => rsp.nl_len,
        );
        decode_response(&rsp)
    }
}
