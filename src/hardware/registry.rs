//! Device descriptor registry.
//!
//! The registry is the static catalogue of everything wired to the DAQ card:
//! which channel a device sits on, which family of channel it is (analog out,
//! analog in, digital out), a free-form category and a unique name. It is
//! built once from configuration and read-only afterwards.
//!
//! Operations never carry descriptors around by value. They select an
//! [`ActiveSet`], an ordered subset of registry entries, for one step
//! (arm these lines, read these channels) and throw it away afterwards.
//!
//! # Reference layout
//!
//! | Family | Ch | Category | Name |
//! |--------|----|----------|------|
//! | DigitalOutput | 0 | Source | Vortran |
//! | DigitalOutput | 1 | Accessory | Tektronix |
//! | DigitalOutput | 2 | Source | SLS205 (shutter, inverted) |
//! | DigitalOutput | 3 | Spectrometer | CCS200 |
//! | AnalogInput | 0..4 | Photodiode | PhotodiodeT, PhotodiodeR, Lamp, PhotodiodeOther |
//! | AnalogInput | 4 | Accessory | SignalGenerator |

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind of DAQ channel a device is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// `ao` channel
    AnalogOutput,
    /// `ai` channel
    AnalogInput,
    /// `port0/line<n>` digital line
    DigitalOutput,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::AnalogOutput => write!(f, "AO"),
            DeviceFamily::AnalogInput => write!(f, "AI"),
            DeviceFamily::DigitalOutput => write!(f, "DO"),
        }
    }
}

/// One configured device on the DAQ card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Line or channel index within the family
    pub channel: u32,
    /// Channel kind
    pub family: DeviceFamily,
    /// Free-form tag, e.g. "Source" or "Photodiode"
    #[serde(default)]
    pub category: String,
    /// Unique within the registry; empty for spare channels
    #[serde(default)]
    pub name: String,
}

impl DeviceDescriptor {
    /// Descriptor for `channel` of `family`.
    pub fn new(
        channel: u32,
        family: DeviceFamily,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            family,
            category: category.into(),
            name: name.into(),
        }
    }

    /// Spare channels are listed so the line map stays complete, but carry no name.
    pub fn is_spare(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_spare() {
            write!(f, "{}{} (spare)", self.family, self.channel)
        } else {
            write!(f, "{} [{}{}]", self.name, self.family, self.channel)
        }
    }
}

/// Validated, immutable catalogue of configured devices.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Build a registry, rejecting duplicate names and duplicate
    /// (family, channel) pairs.
    pub fn new(devices: Vec<DeviceDescriptor>) -> ScanResult<Self> {
        let mut names = HashSet::new();
        let mut slots = HashSet::new();
        for device in &devices {
            if !slots.insert((device.family, device.channel)) {
                return Err(ScanError::configuration(format!(
                    "Duplicate device slot {}{}",
                    device.family, device.channel
                )));
            }
            if !device.is_spare() && !names.insert(device.name.as_str()) {
                return Err(ScanError::configuration(format!(
                    "Duplicate device name '{}'",
                    device.name
                )));
            }
        }
        Ok(Self { devices })
    }

    /// The reference rig wiring: 4 AO, 8 AI and 8 DO channels.
    pub fn reference() -> Self {
        use DeviceFamily::*;
        let mut devices: Vec<DeviceDescriptor> = (0..4)
            .map(|ch| DeviceDescriptor::new(ch, AnalogOutput, "", ""))
            .collect();
        devices.extend([
            DeviceDescriptor::new(0, AnalogInput, "Photodiode", "PhotodiodeT"),
            DeviceDescriptor::new(1, AnalogInput, "Photodiode", "PhotodiodeR"),
            DeviceDescriptor::new(2, AnalogInput, "Photodiode", "Lamp"),
            DeviceDescriptor::new(3, AnalogInput, "Photodiode", "PhotodiodeOther"),
            DeviceDescriptor::new(4, AnalogInput, "Accessory", "SignalGenerator"),
        ]);
        devices.extend((5..8).map(|ch| DeviceDescriptor::new(ch, AnalogInput, "", "")));
        devices.extend([
            DeviceDescriptor::new(0, DigitalOutput, "Source", "Vortran"),
            DeviceDescriptor::new(1, DigitalOutput, "Accessory", "Tektronix"),
            DeviceDescriptor::new(2, DigitalOutput, "Source", "SLS205"),
            DeviceDescriptor::new(3, DigitalOutput, "Spectrometer", "CCS200"),
        ]);
        devices.extend((4..8).map(|ch| DeviceDescriptor::new(ch, DigitalOutput, "", "")));
        Self { devices }
    }

    /// Every descriptor, in declaration order.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Number of descriptors, spares included.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no devices are declared.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Named device, if declared.
    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| !d.is_spare() && d.name == name)
    }

    /// Named devices of one family, in registry order.
    pub fn by_family(&self, family: DeviceFamily) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices
            .iter()
            .filter(move |d| d.family == family && !d.is_spare())
    }

    /// Resolve `names` into an active set, requiring every device to exist
    /// and belong to `family`.
    ///
    /// Order follows the request; repeated names collapse to one entry.
    pub fn select<S: AsRef<str>>(
        &self,
        family: DeviceFamily,
        names: &[S],
    ) -> ScanResult<ActiveSet<'_>> {
        let mut members: Vec<&DeviceDescriptor> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let device = self.get(name).ok_or_else(|| {
                ScanError::configuration(format!("Unknown device '{}'", name))
            })?;
            if device.family != family {
                return Err(ScanError::configuration(format!(
                    "Device '{}' is {} but {} was required",
                    name, device.family, family
                )));
            }
            if !members.contains(&device) {
                members.push(device);
            }
        }
        Ok(ActiveSet { members })
    }
}

/// Ordered subset of registry entries selected for a single operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSet<'a> {
    members: Vec<&'a DeviceDescriptor>,
}

impl<'a> ActiveSet<'a> {
    /// Set with no members.
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Set of `devices`, dropping repeats.
    pub fn from_devices(devices: impl IntoIterator<Item = &'a DeviceDescriptor>) -> Self {
        let mut set = Self::empty();
        for device in devices {
            if !set.members.contains(&device) {
                set.members.push(device);
            }
        }
        set
    }

    /// True when a member sits on `channel` of `family`.
    pub fn contains_channel(&self, family: DeviceFamily, channel: u32) -> bool {
        self.members
            .iter()
            .any(|d| d.family == family && d.channel == channel)
    }

    /// Members in selection order.
    pub fn iter(&self) -> impl Iterator<Item = &'a DeviceDescriptor> + '_ {
        self.members.iter().copied()
    }

    /// Member names in selection order.
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|d| d.name.clone()).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_registry_is_valid() {
        let reference = DeviceRegistry::reference();
        assert_eq!(reference.len(), 20);
        // Re-validating the reference layout must not trip the duplicate checks.
        assert!(DeviceRegistry::new(reference.devices().to_vec()).is_ok());
        assert_eq!(reference.by_family(DeviceFamily::DigitalOutput).count(), 4);
    }

    #[test]
    fn rejects_duplicate_slot() {
        let devices = vec![
            DeviceDescriptor::new(0, DeviceFamily::DigitalOutput, "Source", "Laser"),
            DeviceDescriptor::new(0, DeviceFamily::DigitalOutput, "Source", "Lamp"),
        ];
        assert!(DeviceRegistry::new(devices).is_err());
    }

    #[test]
    fn same_channel_in_different_families_is_fine() {
        let devices = vec![
            DeviceDescriptor::new(0, DeviceFamily::DigitalOutput, "Source", "Laser"),
            DeviceDescriptor::new(0, DeviceFamily::AnalogInput, "Photodiode", "Diode"),
        ];
        assert!(DeviceRegistry::new(devices).is_ok());
    }

    #[test]
    fn rejects_duplicate_name_but_not_spares() {
        let devices = vec![
            DeviceDescriptor::new(0, DeviceFamily::AnalogInput, "Photodiode", "Diode"),
            DeviceDescriptor::new(1, DeviceFamily::AnalogInput, "Photodiode", "Diode"),
        ];
        assert!(DeviceRegistry::new(devices).is_err());

        let spares = vec![
            DeviceDescriptor::new(0, DeviceFamily::AnalogInput, "", ""),
            DeviceDescriptor::new(1, DeviceFamily::AnalogInput, "", ""),
        ];
        assert!(DeviceRegistry::new(spares).is_ok());
    }

    #[test]
    fn select_checks_family_and_existence() {
        let registry = DeviceRegistry::reference();
        let set = registry
            .select(DeviceFamily::DigitalOutput, &["Vortran", "Tektronix", "Vortran"])
            .unwrap();
        assert_eq!(set.names(), vec!["Vortran", "Tektronix"]);
        assert!(set.contains_channel(DeviceFamily::DigitalOutput, 1));

        assert!(registry
            .select(DeviceFamily::AnalogInput, &["Vortran"])
            .is_err());
        assert!(registry
            .select(DeviceFamily::DigitalOutput, &["Nonexistent"])
            .is_err());
    }
}
