// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Configuration of the NC-SI transport and firmware updates.

use crate::ConfigError;
use ncsi_messages::DeviceName;
use ncsi_messages::DEFAULT_MAX_TRANSFER_SIZE;
use pldm_codec::MAX_FIRMWARE_DATA;
use std::time::Duration;

/// The kernel release whose NC-SI driver only speaks `NETLINK_USER`.
pub const LEGACY_KERNEL_RELEASE: &str = "4.1.51";

/// Return the default number of consecutive empty polls before an update is
/// abandoned.
pub const fn default_idle_ceiling() -> u32 {
    70
}

/// Return the default delay between empty polls.
pub const fn default_poll_delay() -> Duration {
    Duration::from_millis(200)
}

/// Return the default bound on waiting for a response from the driver.
pub const fn default_receive_timeout() -> Duration {
    Duration::from_secs(5)
}

/// The kernel interface used to reach the NC-SI driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    /// The vendor driver on raw `NETLINK_USER` sockets.
    NetlinkUser,
    /// The upstream driver's `NCSI` generic netlink family.
    GenericNetlink,
}

impl TransportKind {
    /// Select a transport from the command-line selector, `0` or `1`.
    pub fn from_selector(selector: u8) -> Result<Self, ConfigError> {
        match selector {
            0 => Ok(TransportKind::NetlinkUser),
            1 => Ok(TransportKind::GenericNetlink),
            x => Err(ConfigError::InvalidNetlinkSelector(x)),
        }
    }

    /// Select a transport from a kernel release string.
    ///
    /// Only the exact legacy release uses `NETLINK_USER`. Anything else,
    /// including an unknown release, gets the upstream interface.
    pub fn from_release(release: Option<&str>) -> Self {
        match release {
            Some(LEGACY_KERNEL_RELEASE) => TransportKind::NetlinkUser,
            _ => TransportKind::GenericNetlink,
        }
    }

    /// Select a transport from the running kernel.
    pub fn detect() -> Self {
        Self::from_release(kernel_release().as_deref())
    }
}

/// Return the release of the running kernel, if it can be determined.
pub fn kernel_release() -> Option<String> {
    let uts = nix::sys::utsname::uname().ok()?;
    uts.release().to_str().map(String::from)
}

/// Parameters of a single firmware update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateConfig {
    /// The network device whose NC-SI channel is addressed.
    pub device: DeviceName,

    /// The NC-SI channel on the device.
    pub channel: u8,

    /// The most image data the device may request at once.
    pub max_transfer_size: u32,

    /// The number of consecutive polls finding nothing pending before the
    /// device is considered gone.
    pub idle_ceiling: u32,

    /// The delay between polls that find nothing pending.
    pub poll_delay: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            device: DeviceName::default(),
            channel: 0,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            idle_ceiling: default_idle_ceiling(),
            poll_delay: default_poll_delay(),
        }
    }
}

impl UpdateConfig {
    pub fn device(mut self, device: DeviceName) -> Self {
        self.device = device;
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn max_transfer_size(mut self, size: u32) -> Self {
        self.max_transfer_size = size;
        self
    }

    pub fn idle_ceiling(mut self, ceiling: u32) -> Self {
        self.idle_ceiling = ceiling;
        self
    }

    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Check that the parameters describe a usable update.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = MAX_FIRMWARE_DATA as u32;
        if self.max_transfer_size == 0 || self.max_transfer_size > max {
            return Err(ConfigError::InvalidTransferSize {
                size: self.max_transfer_size,
                max,
            });
        }
        if self.idle_ceiling == 0 {
            return Err(ConfigError::ZeroIdleCeiling);
        }
        Ok(())
    }
}

/// Configuration for talking to the NC-SI driver.
///
/// The [`ConfigBuilder`] can be used to construct this with defaults matching
/// the running kernel.
#[derive(Clone, Debug)]
pub struct Config {
    /// The kernel interface used.
    pub transport: TransportKind,

    /// The bound on a blocking receive from the driver.
    pub receive_timeout: Duration,

    /// Parameters for updates run through this transport.
    pub update: UpdateConfig,
}

/// A builder interface for generating configuration.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    device: Option<String>,
    channel: Option<u8>,
    transport: Option<TransportKind>,
    receive_timeout: Option<Duration>,
    max_transfer_size: Option<u32>,
    idle_ceiling: Option<u32>,
    poll_delay: Option<Duration>,
}

impl ConfigBuilder {
    /// Create a new builder addressing a specific network device.
    pub fn new(device: impl AsRef<str>) -> Self {
        Self {
            device: Some(String::from(device.as_ref())),
            ..Default::default()
        }
    }

    /// Set the NC-SI channel.
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Use a specific transport, rather than detecting it.
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the bound on waiting for the driver to respond.
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Set the most image data a device may request at once.
    pub fn max_transfer_size(mut self, size: u32) -> Self {
        self.max_transfer_size = Some(size);
        self
    }

    /// Set the number of consecutive empty polls tolerated.
    pub fn idle_ceiling(mut self, ceiling: u32) -> Self {
        self.idle_ceiling = Some(ceiling);
        self
    }

    /// Set the delay between empty polls.
    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    /// Build a `Config` from `self`.
    pub fn build(self) -> Result<Config, ConfigError> {
        let device = match self.device {
            None => DeviceName::default(),
            Some(name) => DeviceName::new(&name).map_err(ConfigError::InvalidDevice)?,
        };
        let update = UpdateConfig {
            device,
            channel: self.channel.unwrap_or(0),
            max_transfer_size: self.max_transfer_size.unwrap_or(DEFAULT_MAX_TRANSFER_SIZE),
            idle_ceiling: self.idle_ceiling.unwrap_or_else(default_idle_ceiling),
            poll_delay: self.poll_delay.unwrap_or_else(default_poll_delay),
        };
        update.validate()?;
        Ok(Config {
            transport: self.transport.unwrap_or_else(TransportKind::detect),
            receive_timeout: self.receive_timeout.unwrap_or_else(default_receive_timeout),
            update,
        })
    }
}
