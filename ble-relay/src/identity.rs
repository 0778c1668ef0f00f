use crate::address::normalize_address;
use bluez_async::MacAddress;
use eyre::{Report, WrapErr};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::read_to_string;

/// The name an operator has given to a sensor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SensorIdentity {
    /// Normalized hardware address.
    pub hardware_address: String,
    pub display_name: String,
}

/// Looks up sensor names by hardware address. Immutable once constructed.
#[derive(Clone, Debug, Default)]
pub struct IdentityResolver {
    identities: HashMap<String, SensorIdentity>,
}

impl IdentityResolver {
    /// Builds a resolver from a map of hardware address to display name. Addresses are normalized,
    /// so they may be given in any case and with or without separators.
    pub fn new(names: HashMap<String, String>) -> Self {
        let identities = names
            .into_iter()
            .map(|(address, display_name)| {
                let hardware_address = normalize_address(&address);
                (
                    hardware_address.clone(),
                    SensorIdentity {
                        hardware_address,
                        display_name,
                    },
                )
            })
            .collect();
        Self { identities }
    }

    /// Returns the identity for the given normalized address. Unknown sensors are named after their
    /// address.
    pub fn resolve(&self, normalized_address: &str) -> SensorIdentity {
        self.identities
            .get(normalized_address)
            .cloned()
            .unwrap_or_else(|| SensorIdentity {
                hardware_address: normalized_address.to_owned(),
                display_name: normalized_address.to_owned(),
            })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Reads sensor names from a TOML file of `"AA:BB:CC:DD:EE:FF" = "Name"` entries. Addresses may be
/// in either case but must be colon separated.
///
/// The returned map is keyed by normalized address.
pub fn read_sensor_names(filename: &str) -> Result<HashMap<String, String>, Report> {
    let sensor_names_file =
        read_to_string(filename).wrap_err_with(|| format!("Reading {filename}"))?;
    parse_sensor_names(&sensor_names_file).wrap_err_with(|| format!("Parsing {filename}"))
}

fn parse_sensor_names(contents: &str) -> Result<HashMap<String, String>, Report> {
    let mut names = HashMap::new();
    for (address, name) in toml::from_str::<HashMap<String, String>>(contents)? {
        let mac_address: MacAddress = address.parse()?;
        let normalized = normalize_address(&mac_address.to_string());
        if name.is_empty() {
            eyre::bail!("Empty name for {}", address);
        }
        match names.entry(normalized) {
            Entry::Occupied(entry) => {
                eyre::bail!("{} is named more than once ({})", entry.key(), address)
            }
            Entry::Vacant(entry) => {
                entry.insert(name);
            }
        }
    }
    Ok(names)
}
