//! Data identifier catalog
//!
//! The catalog maps every 32-bit data identifier (DI) the device understands
//! to its metadata and last known value. It is bootstrapped from three JSON
//! documents (energy, demand and variable type definitions) and a
//! deterministic synthesis of the combinatorial DI space:
//!
//! - energy class (DI3 = 0x00): 11 sub-classes x 64 rate items x 13
//!   settlement periods, plus a fixed set of per-phase extra registers
//! - maximum demand class (DI3 = 0x01): 10 sub-classes x 64 x 13 plus its
//!   own extras set
//! - instantaneous variables (DI3 = 0x02): taken verbatim from the JSON
//!
//! The catalog is an explicitly constructed registry, shared as
//! `Arc<DiCatalog>`; readers receive snapshot clones, mutators take the
//! write lock. Nothing borrowed from the map escapes the lock.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::constants::{FORMAT_DEMAND, FORMAT_ENERGY};
use crate::error::{Dlt645Error, Dlt645Result};
use crate::value::Dlt645Value;

/// One catalog entry: a metering quantity with its declared wire format and
/// the value last installed by a read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    /// 32-bit data identifier, DI3.DI2.DI1.DI0 high-to-low.
    pub di: u32,
    /// Display name.
    pub name: String,
    /// Fixed-point format mask (see [`crate::transform`]).
    pub data_format: String,
    /// Current value.
    pub value: Dlt645Value,
    /// Engineering unit (kWh, kW, V, ...).
    pub unit: String,
    /// Unix timestamp of the last value installation, 0 when untouched.
    pub timestamp: i64,
}

impl DataItem {
    /// Create an item with an empty value.
    pub fn new(di: u32, name: &str, data_format: &str, unit: &str) -> Self {
        Self {
            di,
            name: name.to_string(),
            data_format: data_format.to_string(),
            value: Dlt645Value::Empty,
            unit: unit.to_string(),
            timestamp: 0,
        }
    }

    /// Class byte DI3 (energy 0x00, demand 0x01, variable 0x02, ...).
    #[inline]
    pub fn class(&self) -> u8 {
        (self.di >> 24) as u8
    }
}

/// One element of a catalog definition document.
///
/// `Di` is a base-16 string in the JSON (`"02010100"`).
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "Di", deserialize_with = "hex_u32")]
    pub di: u32,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DataFormat")]
    pub data_format: String,
    #[serde(rename = "Unit")]
    pub unit: String,
}

fn hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    u32::from_str_radix(&text, 16).map_err(serde::de::Error::custom)
}

// ============================================================================
// Synthesis Tables
// ============================================================================

/// Number of sub-classes in the energy grid (DI2 = 0..=10).
const ENERGY_SUBCLASSES: usize = 11;

/// Number of sub-classes in the demand grid (DI2 = 1..=10).
const DEMAND_SUBCLASSES: usize = 10;

/// Rate items per sub-class (DI1 = 0..=63).
const ITEMS_PER_SUBCLASS: usize = 64;

/// Settlement periods per register (DI0 = 0 current, 1..=12 historical).
const SETTLEMENT_PERIODS: u32 = 13;

/// Per-phase extra energy registers outside the regular sub-class grid.
/// Definition entries for index k live at `energy_types[64 * 11 + k]`.
const ENERGY_EXTRA_DIS: &[u32] = &[
    0x0080_0000, 0x0081_0000, 0x0082_0000, 0x0083_0000, 0x0084_0000, 0x0085_0000, 0x0086_0000,
    0x0015_0000, 0x0016_0000, 0x0017_0000, 0x0018_0000, 0x0019_0000, 0x001A_0000, 0x001B_0000,
    0x001C_0000, 0x001D_0000, 0x001E_0000, 0x0094_0000, 0x0095_0000, 0x0096_0000, 0x0097_0000,
    0x0098_0000, 0x0099_0000, 0x009A_0000, 0x0029_0000, 0x002A_0000, 0x002B_0000, 0x002C_0000,
    0x002D_0000, 0x002E_0000, 0x002F_0000, 0x0030_0000, 0x0031_0000, 0x0032_0000, 0x00A8_0000,
    0x00A9_0000, 0x00AA_0000, 0x00AB_0000, 0x00AC_0000, 0x00AD_0000, 0x00AE_0000, 0x003D_0000,
    0x003E_0000, 0x003F_0000, 0x0040_0000, 0x0041_0000, 0x0042_0000, 0x0043_0000, 0x0044_0000,
    0x0045_0000, 0x0046_0000, 0x00BC_0000, 0x00BD_0000, 0x00BE_0000, 0x00BF_0000, 0x00C0_0000,
    0x00C1_0000, 0x00C2_0000,
];

/// Per-phase extra demand registers; entries at `demand_types[64 * 10 + k]`.
const DEMAND_EXTRA_DIS: &[u32] = &[
    0x0115_0000, 0x0116_0000, 0x0117_0000, 0x0118_0000, 0x0119_0000, 0x011A_0000, 0x011B_0000,
    0x011C_0000, 0x011D_0000, 0x011E_0000, 0x0129_0000, 0x012A_0000, 0x012B_0000, 0x012C_0000,
    0x012D_0000, 0x012E_0000, 0x012F_0000, 0x0130_0000, 0x0131_0000, 0x0132_0000, 0x013D_0000,
    0x013E_0000, 0x013F_0000, 0x0140_0000, 0x0141_0000, 0x0142_0000, 0x0143_0000, 0x0144_0000,
    0x0145_0000, 0x0146_0000,
];

/// Settlement-period name prefix: `(current)` or `(last N settlement period)`.
fn settlement_prefix(period: u32) -> String {
    if period == 0 {
        "(current)".to_string()
    } else {
        format!("(last {} settlement period)", period)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// The DI registry shared by client and server services.
pub struct DiCatalog {
    items: RwLock<HashMap<u32, DataItem>>,
}

impl DiCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Load the three definition documents from a directory
    /// (`energy_types.json`, `demand_types.json`, `variable_types.json`)
    /// and run the full bootstrap.
    pub fn from_config_dir<P: AsRef<Path>>(dir: P) -> Dlt645Result<Self> {
        let dir = dir.as_ref();
        let energy = load_definitions(&dir.join("energy_types.json"))?;
        let demand = load_definitions(&dir.join("demand_types.json"))?;
        let variables = load_definitions(&dir.join("variable_types.json"))?;
        Ok(Self::from_definitions(&energy, &demand, &variables))
    }

    /// Bootstrap a catalog from already-parsed definition lists.
    ///
    /// The whole construction runs under one exclusive lock. Definition
    /// indexes beyond the loaded list lengths are skipped with a warning;
    /// this is how the catalog degrades when a document is partial.
    pub fn from_definitions(
        energy: &[CatalogEntry],
        demand: &[CatalogEntry],
        variables: &[CatalogEntry],
    ) -> Self {
        let catalog = Self::new();
        {
            let mut map = catalog.items.write().expect("catalog lock poisoned");

            // Definition entries are addressable by their own DI too.
            for entry in energy.iter().chain(demand.iter()).chain(variables.iter()) {
                map.insert(
                    entry.di,
                    DataItem::new(entry.di, &entry.name, &entry.data_format, &entry.unit),
                );
            }

            synthesize_energy(&mut map, energy);
            synthesize_demand(&mut map, demand);

            info!(
                "DI catalog bootstrapped: {} entries ({} energy defs, {} demand defs, {} variables)",
                map.len(),
                energy.len(),
                demand.len(),
                variables.len()
            );
        }
        catalog
    }

    /// Snapshot copy of an entry.
    pub fn get(&self, di: u32) -> Option<DataItem> {
        self.items
            .read()
            .expect("catalog lock poisoned")
            .get(&di)
            .cloned()
    }

    /// Replace an existing entry. Returns false when the DI was never
    /// loaded or synthesized; the caller must have validated the value
    /// against the declared format.
    pub fn update(&self, di: u32, item: DataItem) -> bool {
        let mut map = self.items.write().expect("catalog lock poisoned");
        match map.get_mut(&di) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => {
                debug!("Update rejected for unknown DI 0x{:08X}", di);
                false
            }
        }
    }

    /// Insert or overwrite an entry (application extension point).
    pub fn add(&self, di: u32, item: DataItem) {
        self.items
            .write()
            .expect("catalog lock poisoned")
            .insert(di, item);
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, di: u32) -> bool {
        self.items
            .write()
            .expect("catalog lock poisoned")
            .remove(&di)
            .is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.read().expect("catalog lock poisoned").len()
    }

    /// Whether the catalog holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one definition document.
pub fn load_definitions(path: &Path) -> Dlt645Result<Vec<CatalogEntry>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Dlt645Error::config(format!("Cannot read {}: {}", path.display(), e))
    })?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&text)?;
    info!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

fn synthesize_energy(map: &mut HashMap<u32, DataItem>, energy: &[CatalogEntry]) {
    for subclass in 0..ENERGY_SUBCLASSES {
        for item in 0..ITEMS_PER_SUBCLASS {
            let index = subclass * ITEMS_PER_SUBCLASS + item;
            let Some(entry) = energy.get(index) else {
                warn!(
                    "Energy definition {} missing (subclass {}, item {}); skipping",
                    index, subclass, item
                );
                continue;
            };
            for period in 0..SETTLEMENT_PERIODS {
                let di = ((subclass as u32) << 16) | ((item as u32) << 8) | period;
                map.insert(di, grid_item(di, entry, period, FORMAT_ENERGY));
            }
        }
    }

    for (k, &extra) in ENERGY_EXTRA_DIS.iter().enumerate() {
        let index = ENERGY_SUBCLASSES * ITEMS_PER_SUBCLASS + k;
        let Some(entry) = energy.get(index) else {
            warn!("Energy extras definition {} missing; skipping", index);
            continue;
        };
        for period in 0..SETTLEMENT_PERIODS {
            let di = (extra & 0xFFFF_FF00) | period;
            map.insert(di, grid_item(di, entry, period, FORMAT_ENERGY));
        }
    }
}

fn synthesize_demand(map: &mut HashMap<u32, DataItem>, demand: &[CatalogEntry]) {
    for subclass in 1..=DEMAND_SUBCLASSES {
        for item in 0..ITEMS_PER_SUBCLASS {
            let index = (subclass - 1) * ITEMS_PER_SUBCLASS + item;
            let Some(entry) = demand.get(index) else {
                warn!(
                    "Demand definition {} missing (subclass {}, item {}); skipping",
                    index, subclass, item
                );
                continue;
            };
            for period in 0..SETTLEMENT_PERIODS {
                let di =
                    (0x01u32 << 24) | ((subclass as u32) << 16) | ((item as u32) << 8) | period;
                map.insert(di, grid_item(di, entry, period, FORMAT_DEMAND));
            }
        }
    }

    for (k, &extra) in DEMAND_EXTRA_DIS.iter().enumerate() {
        let index = DEMAND_SUBCLASSES * ITEMS_PER_SUBCLASS + k;
        let Some(entry) = demand.get(index) else {
            warn!("Demand extras definition {} missing; skipping", index);
            continue;
        };
        for period in 0..SETTLEMENT_PERIODS {
            let di = (extra & 0xFFFF_FF00) | period;
            map.insert(di, grid_item(di, entry, period, FORMAT_DEMAND));
        }
    }
}

fn grid_item(di: u32, entry: &CatalogEntry, period: u32, format: &str) -> DataItem {
    DataItem {
        di,
        name: format!("{}{}", settlement_prefix(period), entry.name),
        data_format: format.to_string(),
        value: Dlt645Value::Empty,
        unit: entry.unit.clone(),
        timestamp: 0,
    }
}

// ============================================================================
// Tests
// ============================================================================
