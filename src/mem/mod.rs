// Copyright (C) 2024 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Memory domain: byte-level faults on memory accesses
//!
//! The simulator calls [`MemoryInjector::on_memory_access`] once per access with the whole
//! backing region of the accessed memory. A fault corrupts the byte at the access offset and, for
//! a multi-cell upset, a second byte at a fixed distance after it.

use crate::{
    config::Domain,
    error::{Error, Result},
    injector::{Event, FaultInjector},
    plan::{parse_flag, parse_number, DomainIdentity, FaultDescriptor},
    profile::{split_fields, ProfileEntry},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Identity of a memory access
pub struct MemoryIdentity {
    /// Offset of the access into the backing region
    pub offset: u64,
    /// Size of the access in bytes
    pub access_size: u64,
    /// Size of the backing region in bytes
    pub total_size: u64,
}

impl Display for MemoryIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "offset {} ({} byte access in {} bytes)",
            self.offset, self.access_size, self.total_size
        )
    }
}

fn byte_field(field: &str, name: &str) -> Result<u64> {
    let value = parse_number(field, name)?;

    if value > u64::from(u8::MAX) {
        return Err(Error::configuration(format!(
            "Invalid {name} {field:?}: memory faults corrupt a single byte"
        )));
    }

    Ok(value)
}

fn parse_byte(field: &str, name: &str) -> Result<u8> {
    // byte_field bounds the value
    byte_field(field, name).map(|value| value as u8)
}

impl DomainIdentity for MemoryIdentity {
    const DOMAIN: Domain = Domain::Memory;
    // trigger_iteration mask expected_prior offset access_size total_size multi_cell
    // secondary_offset
    const RECORD_FIELDS: usize = 8;
    const ACCEPTS_BARE_RECORD: bool = true;

    fn parse_record(fields: &[&str]) -> Result<FaultDescriptor<Self>> {
        let [trigger_iteration, mask, expected, offset, access_size, total_size, multi_cell, secondary_offset] =
            fields
        else {
            return Err(Error::configuration(format!(
                "A memory fault has {} fields, got {}",
                Self::RECORD_FIELDS,
                fields.len()
            )));
        };

        let descriptor = FaultDescriptor::builder()
            .trigger_iteration(parse_number(trigger_iteration, "trigger iteration")?)
            .identity(Self {
                offset: parse_number(offset, "offset")?,
                access_size: parse_number(access_size, "access size")?,
                total_size: parse_number(total_size, "total size")?,
            })
            .corruption_mask(parse_number(mask, "corruption mask")?)
            .expected_prior_value(parse_number(expected, "expected memory value")?)
            .secondary_offset(parse_number(secondary_offset, "secondary offset")?)
            .multi_cell(parse_flag(multi_cell, "multi-cell flag")?)
            .build();

        Self::validate(&descriptor)?;

        Ok(descriptor)
    }

    fn validate(descriptor: &FaultDescriptor<Self>) -> Result<()> {
        for (name, value) in [
            ("corruption mask", descriptor.corruption_mask),
            ("expected memory value", descriptor.expected_prior_value),
        ] {
            if value > u64::from(u8::MAX) {
                return Err(Error::configuration(format!(
                    "Invalid {name} {value:#x} at iteration {}: memory faults corrupt a single byte",
                    descriptor.trigger_iteration
                )));
            }
        }

        if descriptor.multi_cell && descriptor.secondary_offset.unwrap_or_default() == 0 {
            return Err(Error::configuration(format!(
                "The multi-cell fault at iteration {} needs a secondary offset other than 0",
                descriptor.trigger_iteration
            )));
        }

        Ok(())
    }

    fn record_fields(descriptor: &FaultDescriptor<Self>) -> Vec<String> {
        vec![
            descriptor.trigger_iteration.to_string(),
            descriptor.corruption_mask.to_string(),
            descriptor.expected_prior_value.to_string(),
            descriptor.identity.offset.to_string(),
            descriptor.identity.access_size.to_string(),
            descriptor.identity.total_size.to_string(),
            u8::from(descriptor.multi_cell).to_string(),
            descriptor.secondary_offset.unwrap_or_default().to_string(),
        ]
    }

    fn outcome_fields(descriptor: &FaultDescriptor<Self>) -> Vec<(&'static str, String)> {
        vec![
            ("trigger_iteration", descriptor.trigger_iteration.to_string()),
            ("corruption_mask", descriptor.corruption_mask.to_string()),
            (
                "expected_prior_value",
                descriptor.expected_prior_value.to_string(),
            ),
            ("offset", descriptor.identity.offset.to_string()),
            ("access_size", descriptor.identity.access_size.to_string()),
            ("total_size", descriptor.identity.total_size.to_string()),
            ("multi_cell", u8::from(descriptor.multi_cell).to_string()),
            (
                "secondary_offset",
                descriptor.secondary_offset.unwrap_or_default().to_string(),
            ),
        ]
    }
}

/// Index of `offset` in a slice of `len` bytes, if it lies inside it
fn slice_index(offset: u64, len: usize) -> Option<usize> {
    usize::try_from(offset).ok().filter(|index| *index < len)
}

fn byte_at(data: &[u8], offset: u64) -> Option<u8> {
    slice_index(offset, data.len()).map(|index| data[index])
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
/// One line of a memory profile log: `counter;byte0;byte1;offset;access_size;total_size`
pub struct MemoryProfileEntry {
    /// Sequence number of the event
    pub sequence: u64,
    /// The byte at the access offset
    pub byte0: u8,
    /// The byte after it, or 0 past the end of the backing region
    pub byte1: u8,
    /// Offset of the access into the backing region
    pub offset: u64,
    /// Size of the access in bytes
    pub access_size: u64,
    /// Size of the backing region in bytes
    pub total_size: u64,
}

impl MemoryProfileEntry {
    fn observe(sequence: u64, data: &[u8], identity: MemoryIdentity) -> Self {
        Self {
            sequence,
            byte0: byte_at(data, identity.offset).unwrap_or_default(),
            byte1: identity
                .offset
                .checked_add(1)
                .and_then(|next| byte_at(data, next))
                .unwrap_or_default(),
            offset: identity.offset,
            access_size: identity.access_size,
            total_size: identity.total_size,
        }
    }

    fn descriptor(&self, mask: u64) -> Result<FaultDescriptor<MemoryIdentity>> {
        if mask > u64::from(u8::MAX) {
            return Err(Error::configuration(format!(
                "Mask {mask:#x} does not fit in the single byte a memory fault corrupts"
            )));
        }

        Ok(FaultDescriptor::builder()
            .trigger_iteration(self.sequence)
            .identity(self.identity())
            .corruption_mask(mask)
            .expected_prior_value(u64::from(self.byte0))
            .secondary_offset(0)
            .build())
    }

    /// A descriptor that corrupts this event's byte and the byte `secondary_offset` after it
    pub fn to_multi_cell_descriptor(
        &self,
        mask: u64,
        secondary_offset: u64,
    ) -> Result<FaultDescriptor<MemoryIdentity>> {
        let secondary = self.offset.checked_add(secondary_offset);
        if secondary_offset == 0 || !secondary.is_some_and(|s| s < self.total_size) {
            return Err(Error::bounds(format!(
                "OFFSET_OUTSIDE_MEMORY_BOUNDS: secondary offset {secondary_offset} from {} in {} bytes",
                self.offset, self.total_size
            )));
        }

        let mut descriptor = self.descriptor(mask)?;
        descriptor.multi_cell = true;
        descriptor.secondary_offset = Some(secondary_offset);

        Ok(descriptor)
    }
}

impl Display for MemoryProfileEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{}",
            self.sequence, self.byte0, self.byte1, self.offset, self.access_size, self.total_size
        )
    }
}

impl FromStr for MemoryProfileEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields = split_fields(s);
        let [sequence, byte0, byte1, offset, access_size, total_size] = fields.as_slice() else {
            return Err(Error::configuration(format!(
                "Malformed memory profile line {s:?}"
            )));
        };

        Ok(Self {
            sequence: parse_number(sequence, "counter")?,
            byte0: parse_byte(byte0, "byte")?,
            byte1: parse_byte(byte1, "byte")?,
            offset: parse_number(offset, "offset")?,
            access_size: parse_number(access_size, "access size")?,
            total_size: parse_number(total_size, "total size")?,
        })
    }
}

impl ProfileEntry for MemoryProfileEntry {
    type Identity = MemoryIdentity;

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn identity(&self) -> MemoryIdentity {
        MemoryIdentity {
            offset: self.offset,
            access_size: self.access_size,
            total_size: self.total_size,
        }
    }

    fn to_descriptor(&self, mask: u64) -> Result<FaultDescriptor<MemoryIdentity>> {
        self.descriptor(mask)
    }
}

/// Fault injection context of the memory domain
pub type MemoryInjector = FaultInjector<MemoryIdentity>;

impl FaultInjector<MemoryIdentity> {
    /// Hook called once per memory access. `data` is the whole backing region and `offset`
    /// indexes into it. `None` means the access has no backing store; such accesses are not
    /// counted.
    pub fn on_memory_access(
        &self,
        data: Option<&mut [u8]>,
        offset: u64,
        access_size: u64,
        total_size: u64,
    ) -> Result<()> {
        let Some(data) = data else {
            return Ok(());
        };

        let identity = MemoryIdentity {
            offset,
            access_size,
            total_size,
        };
        match self.begin_event()? {
            Event::Disabled => Ok(()),
            Event::Profile => {
                self.profile(|sequence| MemoryProfileEntry::observe(sequence, data, identity))
            }
            Event::Inject { sequence } => self.inject_memory(sequence, data, identity),
        }
    }

    fn inject_memory(&self, sequence: u64, data: &mut [u8], identity: MemoryIdentity) -> Result<()> {
        let plan = self.plan()?;

        let Some(descriptor) = plan.find(sequence, &identity) else {
            return Ok(());
        };

        let MemoryIdentity {
            offset, total_size, ..
        } = identity;

        if !offset.checked_add(1).is_some_and(|end| end <= total_size) {
            return Err(Error::bounds(format!(
                "The total offset + 1 is larger than the total memory size: {offset} + 1 > {total_size}"
            )));
        }

        let primary = slice_index(offset, data.len()).ok_or_else(|| {
            Error::bounds(format!(
                "Offset {offset} lies outside the {} byte backing region",
                data.len()
            ))
        })?;

        let secondary = if descriptor.multi_cell {
            let distance = descriptor.secondary_offset.unwrap_or_default();
            let target = offset
                .checked_add(distance)
                .filter(|target| *target < total_size)
                .and_then(|target| slice_index(target, data.len()))
                .ok_or_else(|| {
                    Error::bounds(format!(
                        "OFFSET_OUTSIDE_MEMORY_BOUNDS: {offset} + {distance} in {total_size} bytes"
                    ))
                })?;

            // Flipping the primary byte twice would leave it unchanged
            if target == primary {
                return Err(Error::configuration(format!(
                    "The multi-cell fault at iteration {sequence} targets its primary byte twice"
                )));
            }

            Some(target)
        } else {
            None
        };

        let mask = u8::try_from(descriptor.corruption_mask).map_err(|_| {
            Error::configuration(format!(
                "Mask {:#x} does not fit in the single byte a memory fault corrupts",
                descriptor.corruption_mask
            ))
        })?;

        let before = data[primary];
        if u64::from(before) != descriptor.expected_prior_value {
            return Err(Error::consistency(format!(
                "Something went wrong on the sampling process, mem values from file and current differ: {} {before} {sequence}",
                descriptor.expected_prior_value
            )));
        }

        data[primary] = before ^ mask;
        let after = data[primary];

        let (secondary_before, secondary_after) = match secondary {
            Some(index) => {
                let before = data[index];
                data[index] = before ^ mask;
                (before, data[index])
            }
            None => (0, 0),
        };

        self.record_injection(
            sequence,
            descriptor,
            vec![
                ("mem_val_before", before.to_string()),
                ("mem_val_after", after.to_string()),
                ("secondary_val_before", secondary_before.to_string()),
                ("secondary_val_after", secondary_after.to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod test {
    use super::{MemoryIdentity, MemoryProfileEntry};
    use crate::{
        error::{ErrorKind, Result},
        plan::InjectionPlan,
        profile::ProfileEntry,
    };

    const IDENTITY: MemoryIdentity = MemoryIdentity {
        offset: 64,
        access_size: 4,
        total_size: 1024,
    };

    #[test]
    fn test_legacy_single_record() -> Result<()> {
        let plan = InjectionPlan::<MemoryIdentity>::parse("12 1 170 64 4 1024 1 32")?;
        let descriptor = plan.find(12, &IDENTITY).expect("descriptor at 12");

        assert!(descriptor.multi_cell);
        assert_eq!(descriptor.secondary_offset, Some(32));
        assert_eq!(descriptor.expected_prior_value, 170);
        assert_eq!(plan.to_string(), "1\n12 1 170 64 4 1024 1 32\n");

        Ok(())
    }

    #[test]
    fn test_counted_records() -> Result<()> {
        let plan = InjectionPlan::<MemoryIdentity>::parse(
            "2\n12 0x80 1 64 4 1024 0 0\n13 1 2 64 4 1024 false 0\n",
        )?;

        assert_eq!(plan.len(), 2);
        assert!(plan.find(13, &IDENTITY).is_some());
        assert!(plan
            .find(
                13,
                &MemoryIdentity {
                    offset: 65,
                    ..IDENTITY
                }
            )
            .is_none());

        Ok(())
    }

    #[test]
    fn test_rejected_records() {
        for text in [
            // mask wider than a byte
            "12 256 1 64 4 1024 0 0",
            // multi-cell onto the primary cell
            "12 1 1 64 4 1024 1 0",
            // bad flag
            "12 1 1 64 4 1024 2 0",
            // seven fields
            "12 1 1 64 4 1024 0",
        ] {
            let error = InjectionPlan::<MemoryIdentity>::parse(text).expect_err(text);
            assert_eq!(error.kind(), ErrorKind::Configuration, "plan {text:?}");
        }
    }

    #[test]
    fn test_profile_line() -> Result<()> {
        let data = [0u8, 0xaa, 0xbb];
        let at_end = MemoryProfileEntry::observe(
            3,
            &data,
            MemoryIdentity {
                offset: 2,
                access_size: 1,
                total_size: 3,
            },
        );
        assert_eq!(at_end.to_string(), "3;187;0;2;1;3");

        let parsed: MemoryProfileEntry = "3;187;0;2;1;3;".parse()?;
        assert_eq!(parsed, at_end);
        assert!("3;300;0;2;1;3".parse::<MemoryProfileEntry>().is_err());
        assert!("3;1;0;2;1".parse::<MemoryProfileEntry>().is_err());

        Ok(())
    }

    #[test]
    fn test_descriptors_from_profile() -> Result<()> {
        let entry: MemoryProfileEntry = "12;170;3;64;4;1024".parse()?;

        let single = entry.to_descriptor(1)?;
        assert_eq!(single.identity, IDENTITY);
        assert_eq!(single.expected_prior_value, 170);
        assert!(!single.multi_cell);

        let double = entry.to_multi_cell_descriptor(1, 32)?;
        assert!(double.multi_cell);
        assert_eq!(double.secondary_offset, Some(32));

        assert_eq!(
            entry.to_multi_cell_descriptor(1, 960).map_err(|e| e.kind()),
            Err(ErrorKind::Bounds)
        );
        assert_eq!(
            entry.to_descriptor(0x100).map_err(|e| e.kind()),
            Err(ErrorKind::Configuration)
        );

        Ok(())
    }
}
