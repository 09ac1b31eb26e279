//! Hub storage snapshot, program slots and identity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::protocol::constants::{MAX_SLOT, SLOT_COUNT};
use crate::utils::decode_base64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid program slot index {index}, valid slots: 0-{max}", max = MAX_SLOT)]
pub struct InvalidSlot {
    pub index: u32,
}

/// A validated program slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u32);

impl Slot {
    pub fn new(index: u32) -> Result<Self, InvalidSlot> {
        if index > MAX_SLOT {
            return Err(InvalidSlot { index });
        }
        Ok(Self(index))
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    /// Every slot, lowest first.
    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT).map(Slot)
    }
}

impl TryFrom<u32> for Slot {
    type Error = InvalidSlot;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        Slot::new(index)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which slots a picker should offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFilter {
    All,
    Empty,
    Full,
}

/// Program stored in a slot, as reported by `get_storage_status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Base64 of the program name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub modified: Option<i64>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl SlotInfo {
    /// Program name for display. Names that are not base64 are shown raw.
    pub fn decoded_name(&self) -> String {
        decode_base64(&self.name).unwrap_or_else(|_| self.name.clone())
    }
}

/// Capacity figures of the hub's flash.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pct: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub free: u64,
}

/// Full result of `get_storage_status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageSnapshot {
    #[serde(default)]
    pub storage: StorageInfo,
    /// Occupied slots only; a missing key is an empty slot.
    #[serde(default, deserialize_with = "occupied_slots")]
    pub slots: BTreeMap<u32, SlotInfo>,
}

fn occupied_slots<'de, D>(deserializer: D) -> Result<BTreeMap<u32, SlotInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<u32, Option<SlotInfo>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(index, info)| info.map(|info| (index, info)))
        .collect())
}

impl StorageSnapshot {
    pub fn slot(&self, slot: Slot) -> Option<&SlotInfo> {
        self.slots.get(&slot.index())
    }

    pub fn is_empty_slot(&self, slot: Slot) -> bool {
        self.slot(slot).is_none()
    }

    /// Slots matching `filter`, lowest first, with their program if any.
    pub fn slots_matching(&self, filter: SlotFilter) -> Vec<(Slot, Option<&SlotInfo>)> {
        Slot::all()
            .map(|slot| (slot, self.slot(slot)))
            .filter(|(_, info)| match filter {
                SlotFilter::All => true,
                SlotFilter::Empty => info.is_none(),
                SlotFilter::Full => info.is_some(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FirmwareField {
    #[serde(default)]
    version: Vec<u64>,
    #[serde(default)]
    checksum: String,
}

/// Relevant part of the `get_hub_info` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubInfo {
    #[serde(default)]
    firmware: FirmwareField,
}

impl HubInfo {
    /// `MAJOR.MINOR.PP.BBBB-CHECKSUM`, e.g. `1.2.03.0000-1e60`.
    pub fn firmware_version(&self) -> String {
        let part = |i: usize| self.firmware.version.get(i).copied().unwrap_or(0);
        format!(
            "{}.{}.{:02}.{:04}-{}",
            part(0),
            part(1),
            part(2),
            part(3),
            self.firmware.checksum
        )
    }
}

/// Identity of the connected hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Channel name, usually the serial port path.
    pub name: String,
    pub firmware_version: String,
}
