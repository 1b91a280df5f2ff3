//! # Survey Calculations
//!
//! Each calculation kind owns a record type that carries its own inputs and
//! the outputs of the last computation:
//!
//! - [`resection`] - inverse resection from bearings to ≥4 known points
//!   ([`ResectionJob`])
//! - [`traverse`] - dual-face theodolite traverse reduction
//!   ([`TheodoliteJournal`])
//! - [`gyro`] - five-stage gyroscopic azimuth pipeline ([`GyroMeasurement`])
//!
//! Computations are synchronous functions of the record passed in. They
//! never touch global state or perform I/O.

pub mod gyro;
pub mod resection;
pub mod traverse;

use serde::{Deserialize, Serialize};

pub use gyro::{GyroDefaults, GyroMeasurement, GyroTolerances, ToleranceCheck};
pub use resection::{ReferencePoint, ResectionInput, ResectionJob, ResectionResult};
pub use traverse::{StationMeasurement, TheodoliteJournal};

/// Enum wrapper over the three record kinds.
///
/// Lets a single JSON document hold any calculation, tagged by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CalculationItem {
    Resection(ResectionJob),
    Traverse(TheodoliteJournal),
    Gyro(GyroMeasurement),
}

impl CalculationItem {
    /// User-provided name of the record
    pub fn label(&self) -> &str {
        match self {
            CalculationItem::Resection(r) => &r.name,
            CalculationItem::Traverse(t) => &t.name,
            CalculationItem::Gyro(g) => &g.name,
        }
    }

    /// Calculation kind as a string
    pub fn calc_type(&self) -> &'static str {
        match self {
            CalculationItem::Resection(_) => "Resection",
            CalculationItem::Traverse(_) => "Traverse",
            CalculationItem::Gyro(_) => "Gyro",
        }
    }

    /// Project id, if the record has been saved
    pub fn id(&self) -> Option<u32> {
        match self {
            CalculationItem::Resection(r) => r.id,
            CalculationItem::Traverse(t) => t.id,
            CalculationItem::Gyro(g) => g.id,
        }
    }
}
