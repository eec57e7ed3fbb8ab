// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Drive a firmware update from request to activation.
//!
//! An update runs through a fixed sequence of phases. We first ask the
//! device to enter update mode, describe every component in the package to
//! it, and ask it to update each one. From then on the device drives: we
//! poll for the commands it has queued, requesting image data or reporting
//! progress, and answer each. Once the device reports the image applied we
//! ask it to activate the new firmware.
//!
//! Nothing is retried. The first failure, whether a transport error, a
//! non-success completion code, an unparseable response, or a device that
//! goes quiet for too long, aborts the whole update.

use crate::probes;
use crate::Transport;
use crate::TransportError;
use crate::UpdateConfig;
use crate::UpdateError;
use core::fmt;
use hubpack::SerializedSize;
use ncsi_messages::ncsi;
use ncsi_messages::pldm;
use ncsi_messages::pldm::ActivateFirmwareResponse;
use ncsi_messages::pldm::CancelUpdateResponse;
use ncsi_messages::pldm::Header;
use ncsi_messages::pldm::PassComponentTableResponse;
use ncsi_messages::pldm::RequestUpdateResponse;
use ncsi_messages::pldm::UpdateComponentResponse;
use ncsi_messages::pldm::MAX_INSTANCE_ID;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use pldm_codec::decode_pending_command;
use pldm_codec::decode_response;
use pldm_codec::encode;
use pldm_codec::encode_activate_firmware;
use pldm_codec::encode_cancel_update;
use pldm_codec::encode_pass_component_table;
use pldm_codec::encode_request_update;
use pldm_codec::encode_update_component;
use pldm_codec::handle_pending_command;
use pldm_codec::CommandRequest;
use pldm_codec::CommandResponse;
use pldm_codec::Package;
use pldm_codec::PendingCommand;
use pldm_codec::PendingCommandKind;
use pldm_codec::TransferContext;
use serde::de::DeserializeOwned;
use slog::debug;
use slog::error;
use slog::info;
use slog::trace;
use slog::warn;
use slog::Logger;
use std::time::Duration;

/// Suspend the caller between polls.
pub trait Sleep {
    fn sleep(&mut self, duration: Duration);
}

/// Sleep on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A phase of an update, used to report where it stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    RequestUpdate,
    PassComponentTable(usize),
    UpdateComponent(usize),
    AwaitPendingRequest,
    ServicingTransfer(PendingCommandKind),
    ActivateFirmware,
    CancelUpdate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::RequestUpdate => write!(f, "RequestUpdate"),
            Phase::PassComponentTable(i) => write!(f, "PassComponentTable (component {i})"),
            Phase::UpdateComponent(i) => write!(f, "UpdateComponent (component {i})"),
            Phase::AwaitPendingRequest => write!(f, "AwaitPendingRequest"),
            Phase::ServicingTransfer(kind) => write!(f, "ServicingTransfer ({kind:?})"),
            Phase::ActivateFirmware => write!(f, "ActivateFirmware"),
            Phase::CancelUpdate => write!(f, "CancelUpdate"),
        }
    }
}

/// The state of an update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpdateState {
    RequestUpdate,
    PassComponentTable(usize),
    UpdateComponent(usize),
    AwaitPendingRequest,
    ServicingTransfer(PendingCommand),
    ActivateFirmware,
    Done,
    Failed(Phase),
}

impl UpdateState {
    /// The phase this state belongs to, or `None` if the update is over.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            UpdateState::RequestUpdate => Some(Phase::RequestUpdate),
            UpdateState::PassComponentTable(i) => Some(Phase::PassComponentTable(*i)),
            UpdateState::UpdateComponent(i) => Some(Phase::UpdateComponent(*i)),
            UpdateState::AwaitPendingRequest => Some(Phase::AwaitPendingRequest),
            UpdateState::ServicingTransfer(cmd) => match cmd.kind() {
                Some(kind) => Some(Phase::ServicingTransfer(kind)),
                None => Some(Phase::AwaitPendingRequest),
            },
            UpdateState::ActivateFirmware => Some(Phase::ActivateFirmware),
            UpdateState::Done | UpdateState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Done | UpdateState::Failed(_))
    }

    fn in_transfer_loop(&self) -> bool {
        matches!(
            self,
            UpdateState::AwaitPendingRequest | UpdateState::ServicingTransfer(_)
        )
    }
}

/// Counters describing a single update.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdateStats {
    /// Polls for a pending command.
    pub polls: u32,
    /// Pending commands serviced.
    pub commands: u32,
    /// Image bytes sent to the device.
    pub bytes_served: u64,
    /// Components the device said it would not update.
    pub declined_components: u32,
}

/// Runs firmware updates over a [`Transport`].
#[derive(Debug)]
pub struct Updater<T, S = ThreadSleep> {
    config: UpdateConfig,
    transport: T,
    sleep: S,
    log: Logger,
    instance_id: u8,
    state: UpdateState,
    idle_polls: u32,
    stats: UpdateStats,
}

impl<T: Transport> Updater<T, ThreadSleep> {
    /// Create an updater sleeping on the current thread between polls.
    pub fn new(config: UpdateConfig, transport: T, log: Logger) -> Self {
        Self::with_sleep(config, transport, ThreadSleep, log)
    }
}

impl<T: Transport, S: Sleep> Updater<T, S> {
    /// Create an updater using `sleep` between polls.
    pub fn with_sleep(config: UpdateConfig, transport: T, sleep: S, log: Logger) -> Self {
        if let Err(e) = usdt::register_probes() {
            warn!(log, "failed to register DTrace probes"; "reason" => ?e);
        }
        Self {
            config,
            transport,
            sleep,
            log,
            instance_id: 0,
            state: UpdateState::RequestUpdate,
            idle_polls: 0,
            stats: UpdateStats::default(),
        }
    }

    /// The state of the most recent update.
    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    /// Counters from the most recent update.
    pub fn stats(&self) -> UpdateStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleep
    }

    /// Update the device with every component in `package`.
    ///
    /// On failure the update is abandoned where it stopped. The device is not
    /// told; it may remain in update mode until it gives up on its own or is
    /// sent a CancelUpdate.
    pub fn run<P: Package + ?Sized>(&mut self, package: &P) -> Result<UpdateStats, UpdateError> {
        self.stats = UpdateStats::default();
        self.idle_polls = 0;
        if package.component_count() == 0 {
            self.state = UpdateState::Failed(Phase::RequestUpdate);
            return Err(UpdateError::EmptyPackage);
        }
        info!(
            self.log,
            "starting firmware update";
            "components" => package.component_count(),
            "version" => %package.image_set_version(),
            "device" => %self.config.device,
            "channel" => self.config.channel,
        );

        let mut ctx = TransferContext::new(self.config.max_transfer_size);
        self.enter(UpdateState::RequestUpdate);
        while !self.state.is_terminal() {
            match self.step(package, &mut ctx) {
                Ok(next) => self.enter(next),
                Err(e) => {
                    let phase = e.phase();
                    error!(self.log, "firmware update failed"; "phase" => %phase, "error" => %e);
                    self.state = UpdateState::Failed(phase);
                    return Err(e);
                }
            }
        }
        info!(
            self.log,
            "firmware update complete";
            "polls" => self.stats.polls,
            "bytes_served" => self.stats.bytes_served,
        );
        Ok(self.stats)
    }

    /// Ask the device to abandon any update in progress.
    pub fn cancel(&mut self) -> Result<CancelUpdateResponse, UpdateError> {
        let phase = Phase::CancelUpdate;
        let rsp = self.send_request(phase, encode_cancel_update())?;
        read_body(phase, &rsp)
    }

    fn enter(&mut self, state: UpdateState) {
        // Repeated empty polls are not a change of phase.
        let repeat = state == UpdateState::AwaitPendingRequest && self.state == state;
        if let Some(phase) = state.phase().filter(|_| !repeat) {
            probes::phase__enter!(|| phase.to_string());
            // Only the first entry into the transfer loop is worth noting.
            if state.in_transfer_loop() && self.state.in_transfer_loop() {
                debug!(self.log, "entering phase"; "phase" => %phase);
            } else {
                info!(self.log, "entering phase"; "phase" => %phase);
            }
        }
        self.state = state;
    }

    // Run the current state, returning the next.
    fn step<P: Package + ?Sized>(
        &mut self,
        package: &P,
        ctx: &mut TransferContext,
    ) -> Result<UpdateState, UpdateError> {
        let count = package.component_count();
        match self.state.clone() {
            UpdateState::RequestUpdate => {
                let phase = Phase::RequestUpdate;
                let req = encode_request_update(package, self.config.max_transfer_size)
                    .map_err(|source| UpdateError::Encode { phase, source })?;
                let rsp = self.send_request(phase, req)?;
                let body: RequestUpdateResponse = read_body(phase, &rsp)?;
                debug!(
                    self.log,
                    "device entered update mode";
                    "device_metadata_len" => body.device_metadata_len,
                    "will_send_get_package_data" => body.will_send_get_package_data,
                );
                Ok(UpdateState::PassComponentTable(0))
            }
            UpdateState::PassComponentTable(i) => {
                let phase = Phase::PassComponentTable(i);
                let req = encode_pass_component_table(package, i)
                    .map_err(|source| UpdateError::Encode { phase, source })?;
                let rsp = self.send_request(phase, req)?;
                let body: PassComponentTableResponse = read_body(phase, &rsp)?;
                if body.response != 0 {
                    warn!(
                        self.log,
                        "device may not update component";
                        "component" => i,
                        "response_code" => format!("0x{:02x}", body.response_code),
                    );
                }
                if i + 1 < count {
                    Ok(UpdateState::PassComponentTable(i + 1))
                } else {
                    Ok(UpdateState::UpdateComponent(0))
                }
            }
            UpdateState::UpdateComponent(i) => {
                let phase = Phase::UpdateComponent(i);
                let req = encode_update_component(package, i)
                    .map_err(|source| UpdateError::Encode { phase, source })?;
                let rsp = self.send_request(phase, req)?;
                let body: UpdateComponentResponse = read_body(phase, &rsp)?;
                if body.compatibility_response != 0 {
                    warn!(
                        self.log,
                        "device declined to update component";
                        "component" => i,
                        "response_code" => format!("0x{:02x}", body.compatibility_response_code),
                    );
                    self.stats.declined_components += 1;
                } else {
                    debug!(
                        self.log,
                        "component accepted";
                        "component" => i,
                        "update_option_flags_enabled" => body.update_option_flags_enabled,
                        "time_before_request_fw_data" => body.time_before_request_fw_data,
                    );
                }
                if i + 1 < count {
                    Ok(UpdateState::UpdateComponent(i + 1))
                } else {
                    Ok(UpdateState::AwaitPendingRequest)
                }
            }
            UpdateState::AwaitPendingRequest => self.poll(),
            UpdateState::ServicingTransfer(cmd) => self.service(package, ctx, cmd),
            UpdateState::ActivateFirmware => {
                let phase = Phase::ActivateFirmware;
                let req = encode_activate_firmware()
                    .map_err(|source| UpdateError::Encode { phase, source })?;
                let rsp = self.send_request(phase, req)?;
                // The request was accepted; a short body only loses the estimate.
                match read_body::<ActivateFirmwareResponse>(phase, &rsp) {
                    Ok(body) => info!(
                        self.log,
                        "firmware activation requested";
                        "estimated_time_secs" => body.estimated_time_secs,
                    ),
                    Err(e) => warn!(
                        self.log,
                        "firmware activation requested, but its response is malformed";
                        "error" => %e,
                        "body" => ?rsp.body,
                    ),
                }
                Ok(UpdateState::Done)
            }
            state @ (UpdateState::Done | UpdateState::Failed(_)) => Ok(state),
        }
    }

    // Poll once for a pending command.
    fn poll(&mut self) -> Result<UpdateState, UpdateError> {
        let phase = Phase::AwaitPendingRequest;
        let frame = encode::query_pending_frame(self.config.device, self.config.channel)
            .map_err(|source| UpdateError::Encode { phase, source })?;
        let rsp = self.exchange(phase, &frame)?;
        self.stats.polls += 1;

        match decode_pending_command(&rsp) {
            Ok(Some(cmd)) => {
                self.idle_polls = 0;
                trace!(
                    self.log,
                    "device issued command";
                    "command" => format!("0x{:02x}", cmd.command()),
                    "instance_id" => cmd.request.header.instance_id,
                );
                Ok(UpdateState::ServicingTransfer(cmd))
            }
            Ok(None) => {
                self.idle_polls += 1;
                if self.idle_polls >= self.config.idle_ceiling {
                    error!(
                        self.log,
                        "device went silent";
                        "polls" => self.idle_polls,
                        "delay_ms" => self.config.poll_delay.as_millis() as u64,
                    );
                    return Err(UpdateError::Timeout {
                        polls: self.idle_polls,
                    });
                }
                self.sleep.sleep(self.config.poll_delay);
                Ok(UpdateState::AwaitPendingRequest)
            }
            Err(source) => Err(decode_error(phase, source)),
        }
    }

    // Answer a command the device issued.
    fn service<P: Package + ?Sized>(
        &mut self,
        package: &P,
        ctx: &mut TransferContext,
        cmd: PendingCommand,
    ) -> Result<UpdateState, UpdateError> {
        let Some(kind) = cmd.kind() else {
            error!(
                self.log,
                "device issued unsupported command";
                "command" => format!("0x{:02x}", cmd.command()),
            );
            warn!(
                self.log,
                "device may remain in update mode; a CancelUpdate will reset it"
            );
            return Err(UpdateError::UnknownPendingCommand {
                command: cmd.command(),
            });
        };
        let phase = Phase::ServicingTransfer(kind);

        let reply = handle_pending_command(package, ctx, kind, &cmd.request);
        self.stats.commands += 1;
        self.stats.bytes_served = ctx.bytes_served();

        let frame = encode::reply_frame(self.config.device, self.config.channel, &reply.response)
            .map_err(|source| UpdateError::Encode { phase, source })?;
        let rsp = self.exchange(phase, &frame)?;
        let status = ncsi::Status::parse(rsp.payload()).map_err(|e| UpdateError::Unparseable {
            phase,
            source: e.into(),
        })?;
        if !status.is_completed() {
            error!(self.log, "reply rejected"; "kind" => ?kind, "status" => %status);
            return Err(UpdateError::Rejected { phase, status });
        }
        debug!(
            self.log,
            "sent reply";
            "kind" => ?kind,
            "code" => %reply.response.completion_code,
            "len" => reply.response.body_size(),
        );

        if let Err(source) = reply.status {
            error!(self.log, "failed to service device command"; "kind" => ?kind, "error" => %source);
            return Err(UpdateError::Handler { kind, source });
        }
        match kind {
            PendingCommandKind::TransferComplete => {
                info!(self.log, "image transfer complete"; "bytes_served" => ctx.bytes_served());
            }
            PendingCommandKind::VerifyComplete => info!(self.log, "image verified"),
            PendingCommandKind::ApplyComplete => {
                info!(self.log, "image applied");
                return Ok(UpdateState::ActivateFirmware);
            }
            PendingCommandKind::RequestFirmwareData => {}
        }
        Ok(UpdateState::AwaitPendingRequest)
    }

    fn next_instance_id(&mut self) -> u8 {
        let id = self.instance_id;
        self.instance_id = (self.instance_id + 1) & MAX_INSTANCE_ID;
        id
    }

    // Send a request of our own and require a successful response to it.
    fn send_request(
        &mut self,
        phase: Phase,
        request: CommandRequest,
    ) -> Result<CommandResponse, UpdateError> {
        let request = request.with_instance_id(self.next_instance_id());
        let frame = encode::request_frame(self.config.device, self.config.channel, &request)
            .map_err(|source| UpdateError::Encode { phase, source })?;
        let rsp = self.exchange(phase, &frame)?;
        let rsp = decode_response(&rsp).map_err(|source| decode_error(phase, source))?;
        check_response(&request.header, &rsp)
            .map_err(|source| UpdateError::Unparseable { phase, source })?;
        if !rsp.completion_code.is_success() {
            error!(
                self.log,
                "command failed";
                "phase" => %phase,
                "code" => %rsp.completion_code,
            );
            return Err(UpdateError::Completion {
                phase,
                code: rsp.completion_code,
            });
        }
        Ok(rsp)
    }

    fn exchange(
        &mut self,
        phase: Phase,
        frame: &RequestFrame,
    ) -> Result<ResponseFrame, UpdateError> {
        probes::frame__sent!(|| (frame.opcode(), frame.payload().len() as u64));
        trace!(self.log, "sending frame"; "frame" => ?frame);
        let rsp = self
            .transport
            .send(frame)
            .map_err(|source: TransportError| UpdateError::Transport { phase, source })?;
        probes::frame__received!(|| (rsp.opcode(), rsp.payload_len() as u64));
        trace!(self.log, "received frame"; "frame" => ?rsp);
        Ok(rsp)
    }
}

// An NC-SI rejection is reported apart from a response we could not parse.
fn decode_error(phase: Phase, source: pldm_codec::Error) -> UpdateError {
    match source {
        pldm_codec::Error::Ncsi(status) => UpdateError::Rejected { phase, status },
        source => UpdateError::Unparseable { phase, source },
    }
}

fn read_body<B: DeserializeOwned + SerializedSize>(
    phase: Phase,
    rsp: &CommandResponse,
) -> Result<B, UpdateError> {
    pldm::read(&rsp.body)
        .map(|(body, _)| body)
        .map_err(|e| UpdateError::Unparseable {
            phase,
            source: e.into(),
        })
}

// Check that a response answers the request we sent.
fn check_response(request: &Header, rsp: &CommandResponse) -> Result<(), pldm_codec::Error> {
    if rsp.header.command != request.command || rsp.header.instance_id != request.instance_id {
        return Err(pldm_codec::Error::UnexpectedResponse {
            command: rsp.header.command,
            instance_id: rsp.header.instance_id,
        });
    }
    Ok(())
}
