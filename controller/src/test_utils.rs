// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! An in-memory device for exercising updates without a kernel driver.

use crate::Sleep;
use crate::Transport;
use crate::TransportError;
use ncsi_messages::ncsi::opcode;
use ncsi_messages::pldm::ActivationMethods;
use ncsi_messages::pldm::Command;
use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::pldm::Header;
use ncsi_messages::pldm::VersionString;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use pldm_codec::CommandRequest;
use pldm_codec::CommandResponse;
use pldm_codec::ComponentInfo;
use pldm_codec::FirmwarePackage;
use slog::Drain;
use slog::Logger;
use std::collections::VecDeque;
use std::time::Duration;

pub fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, slog::o!())
}

/// Build a package with one component of each given size.
///
/// Component `i` has identifier `0x100 + i`, and its image bytes count up
/// from `i`.
pub fn test_package(sizes: &[usize]) -> FirmwarePackage {
    let images = sizes.iter().enumerate().map(|(i, size)| {
        let info = ComponentInfo {
            classification: 0x000a,
            identifier: 0x100 + i as u16,
            classification_index: 0,
            comparison_stamp: 0x1000 + i as u32,
            options: ComponentInfo::OPTION_FORCE_UPDATE,
            activation_methods: ActivationMethods::SYSTEM_REBOOT,
            version: VersionString::ascii("fw-1").unwrap(),
        };
        let image = (0..*size).map(|j| (i + j) as u8).collect();
        (info, image)
    });
    FirmwarePackage::from_images(VersionString::ascii("NIC 2.0").unwrap(), images)
}

/// Records each requested delay rather than sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    pub sleeps: Vec<Duration>,
}

impl Sleep for RecordingSleep {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }
}

/// What the device does, in order, when polled and when sent requests.
#[derive(Debug, Default)]
pub struct DeviceScript {
    // `None` is a poll that finds nothing pending.
    pending: VecDeque<Option<CommandRequest>>,
    // The nth request of a command fails with the given code.
    failures: Vec<(u8, usize, CompletionCode)>,
    // Successful responses to a command carry this body.
    bodies: Vec<(u8, Vec<u8>)>,
    instance_id: u8,
}

impl DeviceScript {
    /// Find nothing pending for `polls` polls.
    pub fn idle(mut self, polls: usize) -> Self {
        self.pending.extend(std::iter::repeat_n(None, polls));
        self
    }

    /// Issue an arbitrary command.
    pub fn command(mut self, command: Command, body: &[u8]) -> Self {
        let header = Header::request(self.instance_id, command.into());
        self.instance_id = self.instance_id.wrapping_add(1);
        self.pending
            .push_back(Some(CommandRequest::new(header, body.to_vec())));
        self
    }

    pub fn request_data(self, offset: u32, length: u32) -> Self {
        let mut body = offset.to_le_bytes().to_vec();
        body.extend_from_slice(&length.to_le_bytes());
        self.command(Command::RequestFirmwareData, &body)
    }

    /// Report that a stage completed with `result`.
    pub fn complete(self, command: Command, result: u8) -> Self {
        match command {
            Command::ApplyComplete => self.command(command, &[result, 0, 0]),
            _ => self.command(command, &[result]),
        }
    }

    /// Reject the `nth` request of `command`, counting from zero.
    pub fn fail(mut self, command: Command, nth: usize, code: CompletionCode) -> Self {
        self.failures.push((command.into(), nth, code));
        self
    }

    /// Answer every successful request of `command` with `body`.
    pub fn respond_with(mut self, command: Command, body: &[u8]) -> Self {
        self.bodies.push((command.into(), body.to_vec()));
        self
    }

    fn success_body(&self, command: u8) -> Vec<u8> {
        self.bodies
            .iter()
            .find(|(c, _)| *c == command)
            .map(|(_, body)| body.clone())
            .unwrap_or_else(|| success_body(command))
    }
}

// The body of a successful response to each of our requests.
fn success_body(command: u8) -> Vec<u8> {
    match Command::from_u8(command) {
        Some(Command::RequestUpdate) => vec![0; 3],
        Some(Command::PassComponentTable) => vec![0; 2],
        Some(Command::UpdateComponent) => vec![0; 8],
        Some(Command::ActivateFirmware) => vec![0x1e, 0x00],
        Some(Command::CancelUpdate) => vec![0; 9],
        _ => Vec::new(),
    }
}

/// A device following a [`DeviceScript`], recording everything sent to it.
///
/// Frames are counted from one, in the order sent.
#[derive(Debug)]
pub struct FakeDevice {
    script: DeviceScript,
    sent: usize,
    requests: Vec<CommandRequest>,
    replies: Vec<CommandResponse>,
    queries: usize,
    fail_transport_at: Option<usize>,
    garble_at: Option<usize>,
    answer_with: Option<(usize, Command)>,
    reject: Vec<(usize, [u8; 4])>,
}

impl FakeDevice {
    pub fn new(script: DeviceScript) -> Self {
        Self {
            script,
            sent: 0,
            requests: Vec::new(),
            replies: Vec::new(),
            queries: 0,
            fail_transport_at: None,
            garble_at: None,
            answer_with: None,
            reject: Vec::new(),
        }
    }

    /// Fail the exchange of the given frame.
    pub fn fail_transport_at(&mut self, frame: usize) {
        self.fail_transport_at = Some(frame);
    }

    /// Truncate the PLDM response to the given frame.
    pub fn garble_at(&mut self, frame: usize) {
        self.garble_at = Some(frame);
    }

    /// Answer the given frame as though it were a different command.
    pub fn answer_with_command(&mut self, frame: usize, command: Command) {
        self.answer_with = Some((frame, command));
    }

    /// Answer the given frame with nothing but `status`.
    pub fn reject_at(&mut self, frame: usize, status: [u8; 4]) {
        self.reject.push((frame, status));
    }

    pub fn frames_sent(&self) -> usize {
        self.sent
    }

    /// Our PLDM requests, in order.
    pub fn pldm_requests(&self) -> &[CommandRequest] {
        &self.requests
    }

    pub fn pldm_commands(&self) -> Vec<u8> {
        self.requests.iter().map(|r| r.command()).collect()
    }

    /// Our replies to the device's commands, in order.
    pub fn replies(&self) -> &[CommandResponse] {
        &self.replies
    }

    pub fn queries(&self) -> usize {
        self.queries
    }

    fn respond(&mut self, request: CommandRequest) -> Vec<u8> {
        let nth = self
            .requests
            .iter()
            .filter(|r| r.command() == request.command())
            .count();
        let code = self
            .script
            .failures
            .iter()
            .find(|(c, n, _)| *c == request.command() && *n == nth)
            .map(|(_, _, code)| *code)
            .unwrap_or(CompletionCode::SUCCESS);
        let mut header = request.header.response();
        if let Some((_, command)) = self.answer_with.filter(|(at, _)| *at == self.sent) {
            header.command = command.into();
        }
        let body = if code.is_success() {
            self.script.success_body(request.command())
        } else {
            Vec::new()
        };
        self.requests.push(request);
        CommandResponse {
            header,
            completion_code: code,
            body,
        }
        .to_bytes()
    }
}

impl Transport for FakeDevice {
    fn send(&mut self, frame: &RequestFrame) -> Result<ResponseFrame, TransportError> {
        self.sent += 1;
        if self.fail_transport_at == Some(self.sent) {
            return Err(TransportError::Empty);
        }

        // Every exchange completes at the NC-SI level.
        let mut payload = vec![0; 4];
        match frame.opcode() {
            opcode::PLDM_REQUEST => {
                let request = CommandRequest::parse(frame.payload()).unwrap();
                let mut rsp = self.respond(request);
                if self.garble_at == Some(self.sent) {
                    rsp.truncate(2);
                }
                payload.extend_from_slice(&rsp);
            }
            opcode::QUERY_PENDING_NC_PLDM_REQUEST => {
                self.queries += 1;
                if let Some(Some(request)) = self.script.pending.pop_front() {
                    payload.extend_from_slice(&request.to_bytes());
                }
            }
            opcode::SEND_NC_PLDM_REPLY => {
                self.replies
                    .push(CommandResponse::parse(frame.payload()).unwrap());
            }
            op => panic!("unexpected opcode 0x{op:02x}"),
        }
        if let Some((_, status)) = self.reject.iter().find(|(at, _)| *at == self.sent) {
            payload = status.to_vec();
        }
        Ok(ResponseFrame::new(frame.opcode(), payload).unwrap())
    }
}
