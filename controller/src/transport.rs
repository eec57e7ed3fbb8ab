// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Exchange NC-SI frames with the kernel driver.

use crate::Config;
use crate::TransportError;
use crate::TransportKind;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use slog::debug;
use slog::Logger;

pub mod genl;
pub mod netlink_user;

pub use genl::GenericNetlink;
pub use netlink_user::NetlinkUser;

/// A synchronous request-response exchange with the NC-SI driver.
///
/// A transport validates only what it must to move bytes: the shape of the
/// frames it sends and receives. What the frames mean is left to the caller,
/// and no failure is retried.
pub trait Transport {
    /// Send a request and wait for its response.
    fn send(&mut self, request: &RequestFrame) -> Result<ResponseFrame, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: &RequestFrame) -> Result<ResponseFrame, TransportError> {
        (**self).send(request)
    }
}

/// Construct the transport described by `config`.
pub fn build(config: &Config, log: &Logger) -> Result<Box<dyn Transport>, TransportError> {
    debug!(log, "building transport"; "kind" => ?config.transport);
    match config.transport {
        TransportKind::NetlinkUser => Ok(Box::new(NetlinkUser::new(
            config.receive_timeout,
            log.new(slog::o!("transport" => "netlink_user")),
        ))),
        TransportKind::GenericNetlink => Ok(Box::new(GenericNetlink::new(
            &config.update.device,
            config.receive_timeout,
            log.new(slog::o!("transport" => "genl")),
        )?)),
    }
}
