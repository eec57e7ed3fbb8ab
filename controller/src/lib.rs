// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

#![cfg_attr(usdt_need_asm, feature(asm))]

//! Update network controller firmware over the NC-SI sideband channel.
//!
//! A PLDM firmware update is carried as NC-SI commands, exchanged with the
//! kernel NC-SI driver one frame at a time. The [`Transport`] trait is that
//! exchange; there is one implementation for each kernel interface, chosen
//! once from a [`Config`]. The [`Updater`] drives an update through a
//! [`Transport`] from start to activation, aborting at the first failure.

pub mod config;
pub mod transport;
pub mod update;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use config::ConfigBuilder;
pub use config::TransportKind;
pub use config::UpdateConfig;
pub use transport::Transport;
pub use update::Phase;
pub use update::Sleep;
pub use update::ThreadSleep;
pub use update::UpdateState;
pub use update::UpdateStats;
pub use update::Updater;

use ncsi_messages::ncsi;
use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::Error as MessageError;
use pldm_codec::Error as CodecError;
use pldm_codec::PendingCommandKind;

/// An error configuring the NC-SI controller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid network device name")]
    InvalidDevice(#[source] MessageError),

    #[error("maximum transfer size must be in 1..={max}, found {size}")]
    InvalidTransferSize { size: u32, max: u32 },

    #[error("idle poll ceiling must be non-zero")]
    ZeroIdleCeiling,

    #[error("invalid netlink selector {0}, expected 0 or 1")]
    InvalidNetlinkSelector(u8),
}

/// An error exchanging frames with the kernel NC-SI driver.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open netlink socket")]
    Socket(#[source] std::io::Error),

    #[error("failed to send netlink message")]
    Send(#[source] std::io::Error),

    #[error("failed to receive netlink message")]
    Receive(#[source] std::io::Error),

    #[error("received an empty netlink message")]
    Empty,

    #[error("malformed netlink message: {0}")]
    Malformed(&'static str),

    #[error("kernel returned error {0}")]
    Netlink(i32),

    #[error("netlink library failure: {0}")]
    Library(String),

    #[error("generic netlink family \"{0}\" is not registered")]
    UnknownFamily(&'static str),

    #[error("no network interface named \"{name}\"")]
    Interface {
        name: String,
        #[source]
        err: nix::Error,
    },

    #[error("invalid NC-SI frame")]
    Frame(#[from] MessageError),
}

/// An error encountered during a firmware update.
///
/// Every error, besides an unusable package, names the phase of the update
/// in which it occurred.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("package has no components")]
    EmptyPackage,

    #[error("transport failure during {phase}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("failed to encode request for {phase}")]
    Encode {
        phase: Phase,
        #[source]
        source: CodecError,
    },

    #[error("{phase} failed with completion code {code}")]
    Completion { phase: Phase, code: CompletionCode },

    #[error("NC-SI command rejected during {phase}: {status}")]
    Rejected { phase: Phase, status: ncsi::Status },

    #[error("unparseable response during {phase}")]
    Unparseable {
        phase: Phase,
        #[source]
        source: CodecError,
    },

    #[error("device issued unsupported command 0x{command:02x}")]
    UnknownPendingCommand { command: u8 },

    #[error("failed to service {kind:?}")]
    Handler {
        kind: PendingCommandKind,
        #[source]
        source: CodecError,
    },

    #[error("device was silent for {polls} consecutive polls")]
    Timeout { polls: u32 },
}

impl UpdateError {
    /// Return the phase in which this error occurred.
    pub fn phase(&self) -> Phase {
        match self {
            UpdateError::EmptyPackage => Phase::RequestUpdate,
            UpdateError::Transport { phase, .. }
            | UpdateError::Encode { phase, .. }
            | UpdateError::Completion { phase, .. }
            | UpdateError::Rejected { phase, .. }
            | UpdateError::Unparseable { phase, .. } => *phase,
            UpdateError::UnknownPendingCommand { .. } | UpdateError::Timeout { .. } => {
                Phase::AwaitPendingRequest
            }
            UpdateError::Handler { kind, .. } => Phase::ServicingTransfer(*kind),
        }
    }
}

#[usdt::provider(provider = "ncsi_fwupd")]
mod probes {
    fn frame__sent(_opcode: u8, _len: u64) {}
    fn frame__received(_opcode: u8, _len: u64) {}
    fn phase__enter(_phase: &str) {}
}
