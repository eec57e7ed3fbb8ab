// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Firmware packages and the component table an update needs from them.
//!
//! An update only needs a small view of a package: how many components it
//! has, how each is described to the device, and the bytes of each image.
//! That view is the [`Package`] trait. [`FirmwarePackage`] implements it for
//! packages in the DMTF PLDM firmware package format (DSP0267, header format
//! revisions 1 and 2).

use hubpack::SerializedSize;
use ncsi_messages::pldm;
use ncsi_messages::pldm::ActivationMethods;
use ncsi_messages::pldm::VersionString;
use ncsi_messages::pldm::VersionStringType;
use ncsi_messages::Error as MessageError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::ops::Range;
use std::path::Path;

/// How a single component is described to the device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComponentInfo {
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub comparison_stamp: u32,
    pub options: u16,
    pub activation_methods: ActivationMethods,
    pub version: VersionString,
}

impl ComponentInfo {
    /// Component option requesting the device update even a matching image.
    pub const OPTION_FORCE_UPDATE: u16 = 0x0001;
}

/// The read-only view of a firmware package consumed by an update.
pub trait Package {
    /// The version of the component image set as a whole.
    fn image_set_version(&self) -> &VersionString;

    /// The length of any package data offered to the device.
    fn package_data_len(&self) -> u16;

    fn component_count(&self) -> usize;

    fn component(&self, index: usize) -> Option<&ComponentInfo>;

    fn component_image(&self, index: usize) -> Option<&[u8]>;
}

/// An error parsing a firmware package.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("failed to read package file")]
    Io(#[from] std::io::Error),

    #[error("package truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unrecognized package header identifier")]
    BadIdentifier,

    #[error("unsupported package header format revision {0}")]
    UnsupportedRevision(u8),

    #[error("package has no device identification records")]
    NoDeviceRecords,

    #[error("package has downstream device records, which are not supported")]
    DownstreamDevices,

    #[error("device record length {0} is shorter than its contents")]
    BadRecordLength(u16),

    #[error("component {index} image at {offset}+{size} exceeds package of {len} bytes")]
    ComponentOutOfRange {
        index: usize,
        offset: u32,
        size: u32,
        len: usize,
    },

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Package header identifier for format revision 1 (DSP0267 1.0).
pub const PACKAGE_ID_V1_0: [u8; 16] = [
    0xf0, 0x18, 0x87, 0x8c, 0xcb, 0x7d, 0x49, 0x43, 0x98, 0x00, 0xa0, 0x2f, 0x05, 0x9a, 0xca, 0x02,
];

/// Package header identifier for format revision 2 (DSP0267 1.1).
pub const PACKAGE_ID_V1_1: [u8; 16] = [
    0x12, 0x44, 0xd2, 0x64, 0x8d, 0x7d, 0x47, 0x18, 0xa0, 0x30, 0xfc, 0x8a, 0x56, 0x58, 0x7d, 0x5a,
];

#[derive(Clone, Copy, Debug, Deserialize, Serialize, SerializedSize)]
struct PackageHeaderFixed {
    identifier: [u8; 16],
    format_revision: u8,
    header_size: u16,
    release_time: [u8; 13],
    component_bitmap_bits: u16,
    version_type: u8,
    version_len: u8,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, SerializedSize)]
struct DeviceRecordFixed {
    record_len: u16,
    descriptor_count: u8,
    option_flags: u32,
    version_type: u8,
    version_len: u8,
    package_data_len: u16,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, SerializedSize)]
struct DescriptorFixed {
    descriptor_type: u16,
    len: u16,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, SerializedSize)]
struct ComponentImageFixed {
    classification: u16,
    identifier: u16,
    comparison_stamp: u32,
    options: u16,
    activation_methods: u16,
    location_offset: u32,
    size: u32,
    version_type: u8,
    version_len: u8,
}

const_assert_eq!(PackageHeaderFixed::MAX_SIZE, 36);
const_assert_eq!(DeviceRecordFixed::MAX_SIZE, 11);
const_assert_eq!(ComponentImageFixed::MAX_SIZE, 22);

/// A device identifier descriptor from a device record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    pub descriptor_type: u16,
    pub data: Vec<u8>,
}

/// A device identification record, naming the devices a package applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceRecord {
    pub option_flags: u32,
    pub version: VersionString,
    pub applicable_components: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
    pub package_data: Vec<u8>,
}

impl DeviceRecord {
    /// Return true if the component at `index` applies to this device.
    pub fn applies_to(&self, index: usize) -> bool {
        self.applicable_components
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

#[derive(Clone, Debug)]
struct Component {
    info: ComponentInfo,
    location: Range<usize>,
}

/// A firmware package held in memory.
#[derive(Clone, Debug)]
pub struct FirmwarePackage {
    format_revision: u8,
    release_time: [u8; 13],
    version: VersionString,
    devices: Vec<DeviceRecord>,
    components: Vec<Component>,
    checksum: u32,
    data: Vec<u8>,
}

impl FirmwarePackage {
    /// Read and parse a package file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackageError> {
        Self::parse(std::fs::read(path)?)
    }

    /// Build a package directly from component descriptions and images.
    ///
    /// The result has a single device record applying to every component,
    /// with `image_set_version` as its version and no package data.
    pub fn from_images(
        image_set_version: VersionString,
        images: impl IntoIterator<Item = (ComponentInfo, Vec<u8>)>,
    ) -> Self {
        let mut data = Vec::new();
        let mut components = Vec::new();
        for (info, image) in images {
            let start = data.len();
            data.extend_from_slice(&image);
            components.push(Component {
                info,
                location: start..data.len(),
            });
        }
        let applicable_components = vec![0xff; components.len().div_ceil(8)];
        Self {
            format_revision: 1,
            release_time: [0; 13],
            version: image_set_version.clone(),
            devices: vec![DeviceRecord {
                option_flags: 0,
                version: image_set_version,
                applicable_components,
                descriptors: Vec::new(),
                package_data: Vec::new(),
            }],
            components,
            checksum: 0,
            data,
        }
    }

    /// Parse a package from its raw bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self, PackageError> {
        let mut cursor = Cursor::new(&data);
        let header: PackageHeaderFixed = cursor.fixed("package header")?;
        match (header.identifier, header.format_revision) {
            (PACKAGE_ID_V1_0, 1) | (PACKAGE_ID_V1_1, 2) => {}
            (PACKAGE_ID_V1_0 | PACKAGE_ID_V1_1, rev) => {
                return Err(PackageError::UnsupportedRevision(rev));
            }
            _ => return Err(PackageError::BadIdentifier),
        }
        let version = cursor.version_string(
            header.version_type,
            header.version_len,
            "package version string",
        )?;
        let bitmap_len = usize::from(header.component_bitmap_bits).div_ceil(8);

        let device_count = cursor.byte("device record count")?;
        if device_count == 0 {
            return Err(PackageError::NoDeviceRecords);
        }
        let devices = (0..device_count)
            .map(|_| cursor.device_record(bitmap_len))
            .collect::<Result<Vec<_>, _>>()?;

        if header.format_revision >= 2 && cursor.byte("downstream device record count")? != 0 {
            return Err(PackageError::DownstreamDevices);
        }

        let component_count = cursor.fixed::<u16>("component image count")?;
        let mut infos = Vec::with_capacity(usize::from(component_count));
        for _ in 0..component_count {
            let fixed: ComponentImageFixed = cursor.fixed("component image information")?;
            let version = cursor.version_string(
                fixed.version_type,
                fixed.version_len,
                "component version string",
            )?;
            infos.push((fixed, version));
        }
        let checksum = cursor.fixed::<u32>("package header checksum")?;

        let components = infos
            .into_iter()
            .enumerate()
            .map(|(index, (fixed, version))| {
                let start = fixed.location_offset as usize;
                let end = start.checked_add(fixed.size as usize);
                match end {
                    Some(end) if end <= data.len() => Ok(Component {
                        info: ComponentInfo {
                            classification: fixed.classification,
                            identifier: fixed.identifier,
                            classification_index: 0,
                            comparison_stamp: fixed.comparison_stamp,
                            options: fixed.options,
                            activation_methods: ActivationMethods::from_bits_retain(
                                fixed.activation_methods,
                            ),
                            version,
                        },
                        location: start..end,
                    }),
                    _ => Err(PackageError::ComponentOutOfRange {
                        index,
                        offset: fixed.location_offset,
                        size: fixed.size,
                        len: data.len(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            format_revision: header.format_revision,
            release_time: header.release_time,
            version,
            devices,
            components,
            checksum,
            data,
        })
    }

    pub fn format_revision(&self) -> u8 {
        self.format_revision
    }

    /// The raw DSP0267 timestamp of the package release.
    pub fn release_time(&self) -> &[u8; 13] {
        &self.release_time
    }

    /// The version of the package itself.
    pub fn version(&self) -> &VersionString {
        &self.version
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// The header checksum as recorded in the package.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentInfo> + '_ {
        self.components.iter().map(|c| &c.info)
    }

    // The device record an update is performed against.
    fn primary_device(&self) -> Option<&DeviceRecord> {
        self.devices.first()
    }
}

impl Package for FirmwarePackage {
    fn image_set_version(&self) -> &VersionString {
        self.primary_device()
            .map(|dev| &dev.version)
            .unwrap_or(&self.version)
    }

    fn package_data_len(&self) -> u16 {
        self.primary_device()
            .map(|dev| dev.package_data.len() as u16)
            .unwrap_or(0)
    }

    fn component_count(&self) -> usize {
        self.components.len()
    }

    fn component(&self, index: usize) -> Option<&ComponentInfo> {
        self.components.get(index).map(|c| &c.info)
    }

    fn component_image(&self, index: usize) -> Option<&[u8]> {
        self.components
            .get(index)
            .and_then(|c| self.data.get(c.location.clone()))
    }
}

// A forward-only reader over the package header.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    fn fixed<T>(&mut self, what: &'static str) -> Result<T, PackageError>
    where
        T: DeserializeOwned + SerializedSize,
    {
        let before = self.remaining();
        let (value, rest) = pldm::read::<T>(before).map_err(|_| PackageError::Truncated(what))?;
        self.pos += before.len() - rest.len();
        Ok(value)
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, PackageError> {
        self.fixed(what)
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], PackageError> {
        let out = self
            .remaining()
            .get(..len)
            .ok_or(PackageError::Truncated(what))?;
        self.pos += len;
        Ok(out)
    }

    fn version_string(
        &mut self,
        string_type: u8,
        len: u8,
        what: &'static str,
    ) -> Result<VersionString, PackageError> {
        let bytes = self.bytes(usize::from(len), what)?;
        Ok(VersionString::new(
            VersionStringType(string_type),
            bytes.to_vec(),
        )?)
    }

    fn device_record(&mut self, bitmap_len: usize) -> Result<DeviceRecord, PackageError> {
        let start = self.pos;
        let fixed: DeviceRecordFixed = self.fixed("device record")?;
        let applicable_components = self.bytes(bitmap_len, "applicable components")?.to_vec();
        let version = self.version_string(
            fixed.version_type,
            fixed.version_len,
            "component image set version string",
        )?;
        let descriptors = (0..fixed.descriptor_count)
            .map(|_| {
                let d: DescriptorFixed = self.fixed("record descriptor")?;
                let data = self.bytes(usize::from(d.len), "record descriptor data")?;
                Ok(Descriptor {
                    descriptor_type: d.descriptor_type,
                    data: data.to_vec(),
                })
            })
            .collect::<Result<Vec<_>, PackageError>>()?;
        let package_data = self
            .bytes(usize::from(fixed.package_data_len), "device package data")?
            .to_vec();

        let end = start + usize::from(fixed.record_len);
        if end < self.pos {
            return Err(PackageError::BadRecordLength(fixed.record_len));
        }
        if end > self.data.len() {
            return Err(PackageError::Truncated("device record"));
        }
        self.pos = end;

        Ok(DeviceRecord {
            option_flags: fixed.option_flags,
            version,
            applicable_components,
            descriptors,
            package_data,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    // Build a single-device, revision 1 package containing `images`.
    pub(crate) fn build_package(images: &[&[u8]]) -> Vec<u8> {
        let version = b"NIC 1.2.3";
        let comp_version = b"fw-9";

        let mut record = Vec::new();
        let descriptor = [0x14, 0xe4, 0x16, 0x50];
        let record_len = DeviceRecordFixed::MAX_SIZE
            + 1
            + version.len()
            + DescriptorFixed::MAX_SIZE
            + descriptor.len()
            + 2;
        pldm::append(
            &mut record,
            &DeviceRecordFixed {
                record_len: record_len as u16,
                descriptor_count: 1,
                option_flags: 0,
                version_type: 1,
                version_len: version.len() as u8,
                package_data_len: 2,
            },
        )
        .unwrap();
        record.push(0xff);
        record.extend_from_slice(version);
        pldm::append(
            &mut record,
            &DescriptorFixed {
                descriptor_type: 0x0000,
                len: descriptor.len() as u16,
            },
        )
        .unwrap();
        record.extend_from_slice(&descriptor);
        record.extend_from_slice(&[0xaa, 0xbb]);
        assert_eq!(record.len(), record_len);

        let header_size = PackageHeaderFixed::MAX_SIZE
            + version.len()
            + 1
            + record.len()
            + 2
            + images.len() * (ComponentImageFixed::MAX_SIZE + comp_version.len())
            + 4;

        let mut out = Vec::new();
        pldm::append(
            &mut out,
            &PackageHeaderFixed {
                identifier: PACKAGE_ID_V1_0,
                format_revision: 1,
                header_size: header_size as u16,
                release_time: [0; 13],
                component_bitmap_bits: 8,
                version_type: 1,
                version_len: version.len() as u8,
            },
        )
        .unwrap();
        out.extend_from_slice(version);
        out.push(1);
        out.extend_from_slice(&record);
        out.extend_from_slice(&(images.len() as u16).to_le_bytes());

        let mut offset = header_size;
        for (i, image) in images.iter().enumerate() {
            pldm::append(
                &mut out,
                &ComponentImageFixed {
                    classification: 0x000a,
                    identifier: 0x0100 + i as u16,
                    comparison_stamp: 0x1000 + i as u32,
                    options: 0x0001,
                    activation_methods: 0x0008,
                    location_offset: offset as u32,
                    size: image.len() as u32,
                    version_type: 1,
                    version_len: comp_version.len() as u8,
                },
            )
            .unwrap();
            out.extend_from_slice(comp_version);
            offset += image.len();
        }
        out.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        assert_eq!(out.len(), header_size);
        for image in images {
            out.extend_from_slice(image);
        }
        out
    }

    #[test]
    fn test_parse_package() {
        let first = [1u8; 100];
        let second = [2u8; 40];
        let pkg = FirmwarePackage::parse(build_package(&[&first, &second])).unwrap();

        assert_eq!(pkg.format_revision(), 1);
        assert_eq!(pkg.version().to_string(), "NIC 1.2.3");
        assert_eq!(pkg.checksum(), 0xdead_beef);
        assert_eq!(pkg.devices().len(), 1);
        let dev = &pkg.devices()[0];
        assert!(dev.applies_to(0) && dev.applies_to(1));
        assert_eq!(dev.descriptors[0].data, [0x14, 0xe4, 0x16, 0x50]);

        assert_eq!(pkg.component_count(), 2);
        assert_eq!(pkg.package_data_len(), 2);
        assert_eq!(pkg.image_set_version().to_string(), "NIC 1.2.3");
        let info = pkg.component(1).unwrap();
        assert_eq!(info.identifier, 0x0101);
        assert_eq!(info.comparison_stamp, 0x1001);
        assert_eq!(info.activation_methods, ActivationMethods::SYSTEM_REBOOT);
        assert_eq!(info.version.to_string(), "fw-9");
        assert_eq!(pkg.component_image(0).unwrap(), &first[..]);
        assert_eq!(pkg.component_image(1).unwrap(), &second[..]);
        assert!(pkg.component_image(2).is_none());
    }

    #[test]
    fn test_parse_package_image_out_of_range() {
        let mut data = build_package(&[&[7u8; 64]]);
        data.truncate(data.len() - 1);
        assert!(matches!(
            FirmwarePackage::parse(data),
            Err(PackageError::ComponentOutOfRange { index: 0, size: 64, .. })
        ));
    }

    #[test]
    fn test_parse_package_bad_identifier() {
        let mut data = build_package(&[&[7u8; 4]]);
        data[0] ^= 0xff;
        assert!(matches!(
            FirmwarePackage::parse(data),
            Err(PackageError::BadIdentifier)
        ));
    }

    #[test]
    fn test_parse_package_unsupported_revision() {
        let mut data = build_package(&[&[7u8; 4]]);
        data[16] = 3;
        assert!(matches!(
            FirmwarePackage::parse(data),
            Err(PackageError::UnsupportedRevision(3))
        ));
    }

    #[test]
    fn test_parse_package_truncated_header() {
        let data = build_package(&[&[7u8; 4]]);
        assert!(matches!(
            FirmwarePackage::parse(data[..50].to_vec()),
            Err(PackageError::Truncated(_))
        ));
    }

    #[test]
    fn test_open_package_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_package(&[&[3u8; 16]])).unwrap();
        let pkg = FirmwarePackage::open(file.path()).unwrap();
        assert_eq!(pkg.component_image(0).unwrap(), &[3u8; 16]);

        assert!(matches!(
            FirmwarePackage::open("/nonexistent/package.bin"),
            Err(PackageError::Io(_))
        ));
    }

    #[test]
    fn test_from_images() {
        let info = ComponentInfo {
            classification: 0x000a,
            identifier: 1,
            classification_index: 0,
            comparison_stamp: 0,
            options: 0,
            activation_methods: ActivationMethods::empty(),
            version: VersionString::ascii("a").unwrap(),
        };
        let pkg = FirmwarePackage::from_images(
            VersionString::ascii("set").unwrap(),
            [(info.clone(), vec![1, 2]), (info, vec![3])],
        );
        assert_eq!(pkg.component_count(), 2);
        assert_eq!(pkg.component_image(1).unwrap(), &[3]);
        assert!(pkg.devices()[0].applies_to(1));
        assert_eq!(pkg.package_data_len(), 0);
    }
}
