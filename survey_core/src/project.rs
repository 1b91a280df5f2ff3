//! # Project Data Structures
//!
//! The `Project` struct is the root container for all survey records.
//! Projects serialize to `.srv` files as human-readable JSON.
//!
//! ## Structure
//!
//! ```text
//! Project
//! ├── meta: ProjectMetadata (version, surveyor, job info, timestamps)
//! ├── settings: GlobalSettings (tolerances, instrument defaults)
//! ├── resections: Collection<ResectionJob>
//! ├── journals: Collection<TheodoliteJournal>
//! └── gyro_measurements: Collection<GyroMeasurement>
//! ```
//!
//! Each collection assigns integer ids on first save, starting at 1. Ids
//! only ever increase and are never handed out again after a removal.
//!
//! ## Example
//!
//! ```rust
//! use survey_core::project::Project;
//! use survey_core::calculations::TheodoliteJournal;
//!
//! let mut project = Project::new("A. Surveyor", "24-117", "North portal");
//!
//! let id = project.save(TheodoliteJournal::new("Adit traverse")).unwrap();
//! assert_eq!(id, 1);
//! assert_eq!(project.get::<TheodoliteJournal>(id).unwrap().name, "Adit traverse");
//!
//! let json = serde_json::to_string_pretty(&project).unwrap();
//! assert!(json.contains("Adit traverse"));
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calculations::gyro::{self, GyroDefaults, GyroMeasurement, GyroTolerances};
use crate::calculations::resection::{self, ResectionJob};
use crate::calculations::traverse::TheodoliteJournal;
use crate::calculations::CalculationItem;
use crate::errors::{SurveyError, SurveyResult};

/// Current schema version for .srv files
pub const SCHEMA_VERSION: &str = "0.1.0";

/// A record that can be stored in a project collection.
pub trait Record: Sized {
    /// Collection name used in messages
    const COLLECTION: &'static str;

    fn id(&self) -> Option<u32>;
    fn assign_id(&mut self, id: u32);
    fn name(&self) -> &str;

    fn collection(project: &Project) -> &Collection<Self>;
    fn collection_mut(project: &mut Project) -> &mut Collection<Self>;
}

impl Record for ResectionJob {
    const COLLECTION: &'static str = "resection";

    fn id(&self) -> Option<u32> {
        self.id
    }

    fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(project: &Project) -> &Collection<Self> {
        &project.resections
    }

    fn collection_mut(project: &mut Project) -> &mut Collection<Self> {
        &mut project.resections
    }
}

impl Record for TheodoliteJournal {
    const COLLECTION: &'static str = "journal";

    fn id(&self) -> Option<u32> {
        self.id
    }

    fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(project: &Project) -> &Collection<Self> {
        &project.journals
    }

    fn collection_mut(project: &mut Project) -> &mut Collection<Self> {
        &mut project.journals
    }
}

impl Record for GyroMeasurement {
    const COLLECTION: &'static str = "gyro measurement";

    fn id(&self) -> Option<u32> {
        self.id
    }

    fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(project: &Project) -> &Collection<Self> {
        &project.gyro_measurements
    }

    fn collection_mut(project: &mut Project) -> &mut Collection<Self> {
        &mut project.gyro_measurements
    }
}

/// Integer-keyed record store, iterated in ascending id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection<T> {
    /// Next id to hand out
    next_id: u32,
    items: BTreeMap<u32, T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection {
            next_id: 1,
            items: BTreeMap::new(),
        }
    }
}

impl<T: Record> Collection<T> {
    /// Store a record and return its id.
    ///
    /// A record whose id is already present replaces the stored one. A record
    /// without an id, or with an id that is not present, gets a fresh id.
    ///
    /// # Errors
    ///
    /// `Validation` if the collection has run out of ids.
    pub fn save(&mut self, mut record: T) -> SurveyResult<u32> {
        if let Some(id) = record.id() {
            if let Some(slot) = self.items.get_mut(&id) {
                *slot = record;
                return Ok(id);
            }
        }

        let exhausted = |id: u32| {
            SurveyError::validation(
                "id",
                id.to_string(),
                format!("No ids left in {} collection", T::COLLECTION),
            )
        };
        // Hand-edited files may carry a stale counter
        let after_last = match self.items.keys().next_back() {
            Some(&last) => last.checked_add(1).ok_or_else(|| exhausted(last))?,
            None => 1,
        };
        let id = self.next_id.max(after_last);
        self.next_id = id.checked_add(1).ok_or_else(|| exhausted(id))?;
        record.assign_id(id);
        self.items.insert(id, record);
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    /// Remove a record by id.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record has this id.
    pub fn remove(&mut self, id: u32) -> SurveyResult<T> {
        self.items
            .remove(&id)
            .ok_or_else(|| SurveyError::not_found(T::COLLECTION, id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.values_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Root project container.
///
/// This is the top-level struct that gets serialized to `.srv` files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project metadata (version, surveyor, job info)
    pub meta: ProjectMetadata,

    /// Global settings (tolerances, instrument defaults)
    #[serde(default)]
    pub settings: GlobalSettings,

    #[serde(default)]
    pub resections: Collection<ResectionJob>,

    #[serde(default)]
    pub journals: Collection<TheodoliteJournal>,

    #[serde(default)]
    pub gyro_measurements: Collection<GyroMeasurement>,
}

impl Project {
    /// Create a new empty project.
    ///
    /// # Arguments
    ///
    /// * `surveyor` - Name of the responsible surveyor
    /// * `job_id` - Job number (e.g., "24-117")
    /// * `site` - Site or object name
    pub fn new(
        surveyor: impl Into<String>,
        job_id: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Project {
            meta: ProjectMetadata {
                version: SCHEMA_VERSION.to_string(),
                surveyor: surveyor.into(),
                job_id: job_id.into(),
                site: site.into(),
                created: now,
                modified: now,
            },
            settings: GlobalSettings::default(),
            resections: Collection::default(),
            journals: Collection::default(),
            gyro_measurements: Collection::default(),
        }
    }

    /// New resection job seeded with the project's discrepancy tolerance.
    pub fn new_resection(&self, name: impl Into<String>) -> ResectionJob {
        ResectionJob::new(name, self.settings.max_discrepancy_cm)
    }

    /// New gyro measurement seeded with the project's instrument defaults.
    pub fn new_gyro_measurement(&self, name: impl Into<String>) -> GyroMeasurement {
        GyroMeasurement::new(name, &self.settings.gyro)
    }

    /// Save a record into its collection and return its id.
    ///
    /// # Errors
    ///
    /// `Validation` if the collection has run out of ids.
    pub fn save<T: Record>(&mut self, record: T) -> SurveyResult<u32> {
        let id = T::collection_mut(self).save(record)?;
        self.touch();
        Ok(id)
    }

    pub fn get<T: Record>(&self, id: u32) -> Option<&T> {
        T::collection(self).get(id)
    }

    /// Get a mutable reference to a record.
    ///
    /// Note: finding the record marks the project as modified.
    pub fn get_mut<T: Record>(&mut self, id: u32) -> Option<&mut T> {
        if T::collection(self).get(id).is_some() {
            self.touch();
        }
        T::collection_mut(self).get_mut(id)
    }

    /// Remove a record by id.
    pub fn remove<T: Record>(&mut self, id: u32) -> SurveyResult<T> {
        let record = T::collection_mut(self).remove(id)?;
        self.touch();
        Ok(record)
    }

    /// Update the modified timestamp.
    pub fn touch(&mut self) {
        self.meta.modified = Utc::now();
    }

    /// Total number of records across all collections.
    pub fn item_count(&self) -> usize {
        self.resections.len() + self.journals.len() + self.gyro_measurements.len()
    }

    /// Snapshot of every record, resections first, each kind by ascending id.
    pub fn items(&self) -> Vec<CalculationItem> {
        self.resections
            .iter()
            .cloned()
            .map(CalculationItem::Resection)
            .chain(self.journals.iter().cloned().map(CalculationItem::Traverse))
            .chain(self.gyro_measurements.iter().cloned().map(CalculationItem::Gyro))
            .collect()
    }

    /// Recompute every record that has enough data.
    ///
    /// Resections are re-solved with their stored combinations, or the
    /// default pair when none were chosen yet. Failures are collected rather
    /// than aborting the pass.
    pub fn recompute_all(&mut self) -> RecomputeReport {
        let mut report = RecomputeReport::default();

        for job in self.resections.iter_mut() {
            let outcome = match job.combinations {
                Some(pair) => Ok(pair),
                None => resection::default_combinations(job.input.points.len()),
            }
            .and_then(|(first, second)| job.solve(first, second).map(|_| ()));
            report.record(&job.name, outcome);
        }

        for journal in self.journals.iter_mut() {
            let reduced = journal.reduce_all();
            log::debug!(
                "journal '{}': {} of {} stations reduced",
                journal.name,
                reduced,
                journal.stations.len()
            );
            report.updated += 1;
            report.tolerance_failures += journal
                .face_checks(self.settings.allowable_circle_difference_min)
                .iter()
                .filter(|c| !c.passed)
                .count();
        }

        let tolerances = self.settings.gyro_tolerances;
        for measurement in self.gyro_measurements.iter_mut() {
            let outcome = gyro::calculate_all(measurement, &tolerances).map(|checks| {
                report.tolerance_failures += checks.iter().filter(|c| !c.passed).count();
            });
            report.record(&measurement.name, outcome);
        }

        self.touch();
        report
    }
}

impl Default for Project {
    fn default() -> Self {
        Project::new("", "", "")
    }
}

/// Outcome of [`Project::recompute_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecomputeReport {
    /// Records recomputed without error
    pub updated: usize,
    /// Advisory checks that failed across all records
    pub tolerance_failures: usize,
    /// Record name and the error that stopped it
    pub errors: Vec<(String, SurveyError)>,
}

impl RecomputeReport {
    fn record(&mut self, name: &str, outcome: SurveyResult<()>) {
        match outcome {
            Ok(()) => self.updated += 1,
            Err(e) => {
                log::info!("'{}' not recomputed: {}", name, e);
                self.errors.push((name.to_string(), e));
            }
        }
    }
}

/// Project metadata stored in the file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Schema version (for migration compatibility)
    pub version: String,

    /// Name of the responsible surveyor
    pub surveyor: String,

    /// Job number
    pub job_id: String,

    /// Site or object name
    pub site: String,

    /// When the project was created
    pub created: DateTime<Utc>,

    /// When the project was last modified
    pub modified: DateTime<Utc>,
}

/// Global project settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Resection tolerance for new jobs (cm)
    pub max_discrepancy_cm: f64,

    /// Face-consistency tolerance for journal checks (arc-minutes)
    pub allowable_circle_difference_min: f64,

    /// Instrument defaults for new gyro measurements
    pub gyro: GyroDefaults,

    /// Advisory limits for the gyro pipeline
    pub gyro_tolerances: GyroTolerances,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            max_discrepancy_cm: 10.0,
            allowable_circle_difference_min: 2.0,
            gyro: GyroDefaults::default(),
            gyro_tolerances: GyroTolerances::default(),
        }
    }
}
