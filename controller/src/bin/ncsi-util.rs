// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use itertools::Itertools;
use ncsi_fwupd::transport;
use ncsi_fwupd::ConfigBuilder;
use ncsi_fwupd::Transport;
use ncsi_fwupd::TransportKind;
use ncsi_fwupd::UpdateConfig;
use ncsi_fwupd::Updater;
use ncsi_messages::ncsi;
use ncsi_messages::ncsi::opcode;
use ncsi_messages::pldm::CompletionCode;
use ncsi_messages::RequestFrame;
use ncsi_messages::ResponseFrame;
use ncsi_messages::DEFAULT_DEVICE;
use ncsi_messages::MAX_PAYLOAD_SIZE;
use pldm_codec::decode_completion_code;
use pldm_codec::FirmwarePackage;
use pldm_codec::Package;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::path::Path;
use std::path::PathBuf;
use tabled::Table;
use tabled::Tabled;

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| String::from("invalid log level"))
}

// Accept bytes as decimal or `0x`-prefixed hex.
fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid byte \"{s}\""))
}

fn parse_test_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|_| format!("invalid size \"{s}\""))?;
    if size > MAX_PAYLOAD_SIZE {
        return Err(format!("size must be at most {MAX_PAYLOAD_SIZE}"));
    }
    Ok(size)
}

// The socket test payload counts up from zero.
fn socket_test_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| i as u8).collect()
}

/// Update network controller firmware over NC-SI.
///
/// This tool talks to the kernel NC-SI driver to run PLDM firmware updates
/// on the network controller behind a network device, and to send it
/// arbitrary NC-SI commands.
#[derive(Parser)]
#[command(version, about, long_about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,

    /// The network device whose NC-SI channel to address.
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    netdev: String,

    /// The NC-SI channel on the device.
    #[arg(short, long, default_value_t = 0)]
    channel: u8,

    /// The kernel interface to use: 0 for the legacy NETLINK_USER driver,
    /// 1 for the NCSI generic netlink family.
    ///
    /// The default is chosen from the running kernel.
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    netlink: Option<u8>,

    /// The log-level.
    #[arg(
        long,
        default_value_t = Level::Info,
        value_parser = parse_log_level
    )]
    log_level: Level,
}

#[derive(Subcommand)]
enum Cmd {
    /// Update the controller with every component in a firmware package.
    Update {
        /// The PLDM firmware package.
        file: PathBuf,

        /// The most image data the device may request at once.
        #[arg(short, long)]
        buffer_size: Option<u32>,
    },

    /// Ask the controller to abandon an update in progress.
    Cancel,

    /// Print the contents of a firmware package.
    PkgInfo {
        /// The PLDM firmware package.
        file: PathBuf,
    },

    /// Send an arbitrary NC-SI command and print the response.
    Raw {
        /// The NC-SI command opcode.
        #[arg(value_parser = parse_byte)]
        opcode: u8,

        /// The command payload.
        #[arg(value_parser = parse_byte)]
        payload: Vec<u8>,
    },

    /// Print the controller's packet statistics.
    Stats,

    /// Send a test pattern through the driver socket and print the reply.
    SocketTest {
        /// The number of payload bytes to send.
        #[arg(value_parser = parse_test_size)]
        size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, args.log_level).fuse();
    let log = Logger::root(drain, slog::o!());

    match args.cmd {
        Cmd::PkgInfo { file } => {
            let package = load_package(&file)?;
            print_package(&package);
        }
        Cmd::Update { file, buffer_size } => {
            let package = load_package(&file)?;
            let (config, transport) =
                connect(&args.netdev, args.channel, args.netlink, buffer_size, &log)?;
            let mut updater = Updater::new(config, transport, log.clone());
            let stats = updater.run(&package)?;
            println!(
                "Update complete: {} components, {} bytes served over {} polls",
                package.component_count(),
                stats.bytes_served,
                stats.polls,
            );
            if stats.declined_components > 0 {
                println!(
                    "The device declined to update {} components",
                    stats.declined_components
                );
            }
        }
        Cmd::Cancel => {
            let (config, transport) =
                connect(&args.netdev, args.channel, args.netlink, None, &log)?;
            let mut updater = Updater::new(config, transport, log.clone());
            let rsp = updater.cancel()?;
            println!("CancelUpdate completed: {}", CompletionCode::SUCCESS);
            if rsp.non_functioning_components {
                println!(
                    "Non-functioning components: 0x{:016x}",
                    rsp.non_functioning_bitmap
                );
            }
        }
        Cmd::Raw { opcode, payload } => {
            let (config, mut transport) =
                connect(&args.netdev, args.channel, args.netlink, None, &log)?;
            let frame = RequestFrame::new(config.device, config.channel, opcode, &payload)?;
            let rsp = transport.send(&frame)?;
            print_response(&rsp)?;
        }
        Cmd::Stats => {
            let (config, mut transport) =
                connect(&args.netdev, args.channel, args.netlink, None, &log)?;
            let frame = RequestFrame::new(
                config.device,
                config.channel,
                opcode::GET_CONTROLLER_PACKET_STATISTICS,
                &[],
            )?;
            let rsp = transport.send(&frame)?;
            print_response(&rsp)?;
        }
        Cmd::SocketTest { size } => {
            println!("Socket test, size = {size}");
            let (config, mut transport) =
                connect(&args.netdev, args.channel, args.netlink, None, &log)?;
            let frame = RequestFrame::new(
                config.device,
                config.channel,
                opcode::SOCKET_TEST,
                &socket_test_payload(size),
            )?;
            let rsp = transport.send(&frame)?;
            print_response(&rsp)?;
        }
    }
    Ok(())
}

fn load_package(file: &Path) -> anyhow::Result<FirmwarePackage> {
    FirmwarePackage::open(file)
        .with_context(|| format!("failed to load package {}", file.display()))
}

// Build the configuration from the command line and open the transport it
// names.
fn connect(
    netdev: &str,
    channel: u8,
    netlink: Option<u8>,
    buffer_size: Option<u32>,
    log: &Logger,
) -> anyhow::Result<(UpdateConfig, Box<dyn Transport>)> {
    let mut builder = ConfigBuilder::new(netdev).channel(channel);
    if let Some(selector) = netlink {
        builder = builder.transport(TransportKind::from_selector(selector)?);
    }
    if let Some(size) = buffer_size {
        builder = builder.max_transfer_size(size);
    }
    let config = builder.build().context("invalid configuration")?;
    let transport = transport::build(&config, log).context("failed to open NC-SI transport")?;
    Ok((config.update, transport))
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("0x{byte:02x}")).join(" ")
}

fn print_response(rsp: &ResponseFrame) -> anyhow::Result<()> {
    let status = ncsi::Status::parse(rsp.payload()).context("response has no status")?;
    println!("Opcode:   0x{:02x}", rsp.opcode());
    println!("Response: {}", status.response);
    println!("Reason:   {}", status.reason);
    if rsp.opcode() == opcode::PLDM_REQUEST && status.is_completed() {
        let code = decode_completion_code(rsp).context("malformed PLDM response")?;
        println!("PLDM completion code: {code}");
    }
    println!("Payload ({} bytes): [{}]", rsp.payload_len(), hex(rsp.command_payload()));
    Ok(())
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Index")]
    index: usize,
    #[tabled(rename = "Class")]
    classification: String,
    #[tabled(rename = "Identifier")]
    identifier: String,
    #[tabled(rename = "Stamp")]
    comparison_stamp: String,
    #[tabled(rename = "Options")]
    options: String,
    #[tabled(rename = "Size")]
    size: usize,
    #[tabled(rename = "Version")]
    version: String,
}

fn print_package(package: &FirmwarePackage) {
    println!("Package version:   {}", package.version());
    println!("Format revision:   {}", package.format_revision());
    println!("Image set version: {}", package.image_set_version());
    println!("Header checksum:   0x{:08x}", package.checksum());
    for (i, device) in package.devices().iter().enumerate() {
        let descriptors = device
            .descriptors
            .iter()
            .map(|d| format!("0x{:04x}=[{}]", d.descriptor_type, hex(&d.data)))
            .join(", ");
        println!(
            "Device {i}: version {}, descriptors {descriptors}, {} bytes of package data",
            device.version,
            device.package_data.len(),
        );
    }

    let rows = package.components().enumerate().map(|(index, c)| ComponentRow {
        index,
        classification: format!("0x{:04x}", c.classification),
        identifier: format!("0x{:04x}", c.identifier),
        comparison_stamp: format!("0x{:08x}", c.comparison_stamp),
        options: format!("0x{:04x}", c.options),
        size: package.component_image(index).map_or(0, <[u8]>::len),
        version: c.version.to_string(),
    });
    println!("{}", Table::new(rows));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_test_args() {
        let args = Args::try_parse_from(["ncsi-util", "-n", "eth1", "socket-test", "300"]).unwrap();
        assert_eq!(args.netdev, "eth1");
        assert!(matches!(args.cmd, Cmd::SocketTest { size: 300 }));

        let too_big = (MAX_PAYLOAD_SIZE + 1).to_string();
        assert!(Args::try_parse_from(["ncsi-util", "socket-test", too_big.as_str()]).is_err());
        assert!(Args::try_parse_from(["ncsi-util", "socket-test", "lots"]).is_err());
    }

    #[test]
    fn test_socket_test_payload() {
        assert!(socket_test_payload(0).is_empty());
        let payload = socket_test_payload(300);
        assert_eq!(payload.len(), 300);
        assert_eq!(payload[..3], [0, 1, 2]);
        assert_eq!(payload[255..258], [255, 0, 1]);
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x51"), Ok(0x51));
        assert_eq!(parse_byte("18"), Ok(18));
        assert!(parse_byte("0x100").is_err());
    }
}
