//! # Theodolite Traverse Reduction
//!
//! Reduces dual-face (left/right circle) horizontal readings taken at a
//! traverse station to the station angle, and slope distances to
//! horizontal distances.
//!
//! ## Reduction
//!
//! For a station sighting point 1 then point 2:
//!
//! - `left_diff = |L2 − L1|`
//! - `right_diff = 360° − |R2 − R1|` (the right-circle readings run in the
//!   opposite sense)
//! - `average_angle = (left_diff + right_diff) / 2`
//! - `horizontal_distance = distance · cos(slope_angle)`
//!
//! Readings are optional fields. A reading of exactly 0°0′0″ is a real
//! reading; only an absent field holds the reduction back.
//!
//! ## Example
//!
//! ```rust
//! use survey_core::calculations::traverse::StationMeasurement;
//!
//! let mut station = StationMeasurement::new(1, 10, 11);
//! station.set_left_circle_1(Some("0 0 0".parse().unwrap()));
//! station.set_left_circle_2(Some("85 30 0".parse().unwrap()));
//! station.set_right_circle_1(Some("10 0 0".parse().unwrap()));
//! station.set_right_circle_2(Some("284 30 0".parse().unwrap()));
//!
//! let average = station.average_angle().unwrap();
//! assert_eq!(average.format(), "85°30′0.0″");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::angle::Angle;
use crate::errors::{SurveyError, SurveyResult};

/// Readings and reduced values for one traverse station.
///
/// Raw readings are only changed through setters, and every setter
/// recomputes the derived fields. Derived fields are never read back from
/// JSON; they are recomputed from the raw readings on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StationReadings")]
pub struct StationMeasurement {
    pub station_number: u32,
    /// First sighted point
    pub point1: u32,
    /// Second sighted point
    pub point2: u32,

    distance: Option<f64>,
    slope_angle: Option<Angle>,
    left_circle_1: Option<Angle>,
    right_circle_1: Option<Angle>,
    left_circle_2: Option<Angle>,
    right_circle_2: Option<Angle>,

    left_diff: Option<Angle>,
    right_diff: Option<Angle>,
    average_angle: Option<Angle>,
    horizontal_distance: Option<f64>,
}

/// Raw-reading shape a station is loaded from.
#[derive(Deserialize)]
struct StationReadings {
    station_number: u32,
    point1: u32,
    point2: u32,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    slope_angle: Option<Angle>,
    #[serde(default)]
    left_circle_1: Option<Angle>,
    #[serde(default)]
    right_circle_1: Option<Angle>,
    #[serde(default)]
    left_circle_2: Option<Angle>,
    #[serde(default)]
    right_circle_2: Option<Angle>,
}

impl From<StationReadings> for StationMeasurement {
    fn from(readings: StationReadings) -> Self {
        let mut station = StationMeasurement {
            station_number: readings.station_number,
            point1: readings.point1,
            point2: readings.point2,
            distance: readings.distance,
            slope_angle: readings.slope_angle,
            left_circle_1: readings.left_circle_1,
            right_circle_1: readings.right_circle_1,
            left_circle_2: readings.left_circle_2,
            right_circle_2: readings.right_circle_2,
            ..Default::default()
        };
        station.recompute();
        station
    }
}

impl StationMeasurement {
    pub fn new(station_number: u32, point1: u32, point2: u32) -> Self {
        StationMeasurement {
            station_number,
            point1,
            point2,
            ..Default::default()
        }
    }

    // === Raw readings ===

    /// Slope distance to the sighted point (m)
    pub fn distance(&self) -> Option<f64> {
        self.distance
    }

    pub fn slope_angle(&self) -> Option<Angle> {
        self.slope_angle
    }

    pub fn left_circle_1(&self) -> Option<Angle> {
        self.left_circle_1
    }

    pub fn right_circle_1(&self) -> Option<Angle> {
        self.right_circle_1
    }

    pub fn left_circle_2(&self) -> Option<Angle> {
        self.left_circle_2
    }

    pub fn right_circle_2(&self) -> Option<Angle> {
        self.right_circle_2
    }

    pub fn set_distance(&mut self, distance: Option<f64>) {
        self.distance = distance;
        self.recompute();
    }

    pub fn set_slope_angle(&mut self, slope_angle: Option<Angle>) {
        self.slope_angle = slope_angle;
        self.recompute();
    }

    pub fn set_left_circle_1(&mut self, reading: Option<Angle>) {
        self.left_circle_1 = reading;
        self.recompute();
    }

    pub fn set_right_circle_1(&mut self, reading: Option<Angle>) {
        self.right_circle_1 = reading;
        self.recompute();
    }

    pub fn set_left_circle_2(&mut self, reading: Option<Angle>) {
        self.left_circle_2 = reading;
        self.recompute();
    }

    pub fn set_right_circle_2(&mut self, reading: Option<Angle>) {
        self.right_circle_2 = reading;
        self.recompute();
    }

    // === Derived values ===

    pub fn left_diff(&self) -> Option<Angle> {
        self.left_diff
    }

    pub fn right_diff(&self) -> Option<Angle> {
        self.right_diff
    }

    pub fn average_angle(&self) -> Option<Angle> {
        self.average_angle
    }

    /// Horizontal distance (m)
    pub fn horizontal_distance(&self) -> Option<f64> {
        self.horizontal_distance
    }

    /// Whether the station angle has been reduced
    pub fn is_reduced(&self) -> bool {
        self.average_angle.is_some()
    }

    /// Names of the circle readings still missing.
    pub fn missing_readings(&self) -> Vec<&'static str> {
        [
            ("left_circle_1", self.left_circle_1),
            ("right_circle_1", self.right_circle_1),
            ("left_circle_2", self.left_circle_2),
            ("right_circle_2", self.right_circle_2),
        ]
        .into_iter()
        .filter(|(_, reading)| reading.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    fn recompute(&mut self) {
        self.horizontal_distance = match (self.distance, self.slope_angle) {
            (Some(distance), Some(slope)) => Some(distance * slope.to_radians().cos()),
            _ => None,
        };

        match (
            self.left_circle_1,
            self.right_circle_1,
            self.left_circle_2,
            self.right_circle_2,
        ) {
            (Some(l1), Some(r1), Some(l2), Some(r2)) => {
                let left_diff = (l2 - l1).abs();
                let right_diff = Angle::FULL_CIRCLE - (r2 - r1).abs();
                let average = Angle::mean(left_diff, right_diff);
                log::debug!(
                    "station {}: left {} right {} average {}",
                    self.station_number,
                    left_diff,
                    right_diff,
                    average
                );
                self.left_diff = Some(left_diff);
                self.right_diff = Some(right_diff);
                self.average_angle = Some(average);
            }
            _ => {
                self.left_diff = None;
                self.right_diff = None;
                self.average_angle = None;
            }
        }
    }
}

/// Recompute a station's derived values.
///
/// # Errors
///
/// `InsufficientData` naming the circle readings that are still absent. The
/// horizontal distance is still updated in that case.
pub fn reduce_station(station: &mut StationMeasurement) -> SurveyResult<()> {
    station.recompute();
    let missing = station.missing_readings();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SurveyError::insufficient_data(
            format!("station {}", station.station_number),
            format!("missing readings: {}", missing.join(", ")),
        ))
    }
}

/// Place of zero and vertical angle from one pair of vertical-circle readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerticalAngle {
    /// Index error MO = (R + L) / 2
    pub place_of_zero: Angle,
    /// ν = MO − R
    pub vertical_angle: Angle,
}

/// Vertical angle and index error (place of zero) from left/right readings.
pub fn vertical_angle_and_index_error(left_circle: Angle, right_circle: Angle) -> VerticalAngle {
    let place_of_zero = Angle::mean(right_circle, left_circle);
    VerticalAngle {
        place_of_zero,
        vertical_angle: place_of_zero - right_circle,
    }
}

/// Whether two face readings agree within `allowable_minutes` arc-minutes.
pub fn check_circle_difference(left: Angle, right: Angle, allowable_minutes: f64) -> bool {
    (left - right).abs().decimal_degrees() <= allowable_minutes / 60.0
}

/// Face-consistency result for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCheck {
    pub station_number: u32,
    /// |left_diff − right_diff|
    pub difference: Angle,
    pub allowable_minutes: f64,
    pub passed: bool,
}

/// A traverse journal: an ordered list of stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheodoliteJournal {
    /// Assigned by the project on first save
    pub id: Option<u32>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub stations: Vec<StationMeasurement>,
}

impl TheodoliteJournal {
    pub fn new(name: impl Into<String>) -> Self {
        TheodoliteJournal {
            id: None,
            name: name.into(),
            created_at: Utc::now(),
            stations: Vec::new(),
        }
    }

    pub fn add_station(&mut self, station: StationMeasurement) {
        self.stations.push(station);
    }

    /// Reduce every station; returns how many have a station angle.
    pub fn reduce_all(&mut self) -> usize {
        let mut reduced = 0;
        for station in &mut self.stations {
            match reduce_station(station) {
                Ok(()) => reduced += 1,
                Err(e) => log::debug!("{}", e),
            }
        }
        reduced
    }

    /// Compare the left- and right-face station angles of every reduced
    /// station against `allowable_minutes`.
    pub fn face_checks(&self, allowable_minutes: f64) -> Vec<FaceCheck> {
        self.stations
            .iter()
            .filter_map(|station| {
                let (left, right) = (station.left_diff()?, station.right_diff()?);
                let passed = check_circle_difference(left, right, allowable_minutes);
                if !passed {
                    log::warn!(
                        "station {}: face angles differ by {} (allowed {}′)",
                        station.station_number,
                        (left - right).abs(),
                        allowable_minutes
                    );
                }
                Some(FaceCheck {
                    station_number: station.station_number,
                    difference: (left - right).abs(),
                    allowable_minutes,
                    passed,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn angle(text: &str) -> Angle {
        text.parse().unwrap()
    }

    fn full_station() -> StationMeasurement {
        let mut station = StationMeasurement::new(1, 101, 102);
        station.set_left_circle_1(Some(angle("10 0 0")));
        station.set_left_circle_2(Some(angle("95 30 0")));
        station.set_right_circle_1(Some(angle("10 0 30")));
        station.set_right_circle_2(Some(angle("284 30 0")));
        station
    }

    #[test]
    fn test_station_angle_reduction() {
        let station = full_station();
        assert!(station.is_reduced());
        assert_eq!(station.left_diff().unwrap().format(), "85°30′0.0″");
        assert_eq!(station.right_diff().unwrap().format(), "85°30′30.0″");
        assert_eq!(station.average_angle().unwrap().format(), "85°30′15.0″");
    }

    #[test]
    fn test_partial_readings_leave_derived_unset() {
        let mut station = StationMeasurement::new(2, 1, 2);
        station.set_left_circle_1(Some(angle("10 0 0")));
        station.set_left_circle_2(Some(angle("95 30 0")));
        station.set_right_circle_1(Some(angle("190 0 0")));
        assert!(!station.is_reduced());
        assert_eq!(station.missing_readings(), vec!["right_circle_2"]);

        let err = reduce_station(&mut station).unwrap_err();
        assert!(matches!(err, SurveyError::InsufficientData { .. }));
        assert!(err.to_string().contains("right_circle_2"));
    }

    #[test]
    fn test_zero_reading_is_a_real_reading() {
        let mut station = StationMeasurement::new(3, 1, 2);
        station.set_left_circle_1(Some(Angle::ZERO));
        station.set_left_circle_2(Some(angle("45 0 0")));
        station.set_right_circle_1(Some(Angle::ZERO));
        station.set_right_circle_2(Some(angle("315 0 0")));
        assert!(reduce_station(&mut station).is_ok());
        assert_abs_diff_eq!(
            station.average_angle().unwrap().decimal_degrees(),
            45.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_clearing_a_reading_clears_derived() {
        let mut station = full_station();
        station.set_right_circle_2(None);
        assert!(station.left_diff().is_none());
        assert!(station.average_angle().is_none());
    }

    #[test]
    fn test_horizontal_distance_follows_inputs() {
        let mut station = StationMeasurement::new(1, 1, 2);
        station.set_distance(Some(100.0));
        assert!(station.horizontal_distance().is_none());

        station.set_slope_angle(Some(angle("3 0 0")));
        assert_abs_diff_eq!(station.horizontal_distance().unwrap(), 99.862953, epsilon = 1e-6);

        station.set_distance(Some(50.0));
        assert_abs_diff_eq!(station.horizontal_distance().unwrap(), 49.931477, epsilon = 1e-6);

        station.set_slope_angle(Some(Angle::ZERO));
        assert_abs_diff_eq!(station.horizontal_distance().unwrap(), 50.0);
    }

    #[test]
    fn test_vertical_angle_and_index_error() {
        let result = vertical_angle_and_index_error(angle("2 15 0"), angle("-2 13 0"));
        assert_eq!(result.place_of_zero.format(), "0°1′0.0″");
        assert_eq!(result.vertical_angle.format(), "2°14′0.0″");
    }

    #[test]
    fn test_vertical_angle_negative_sub_degree() {
        let result = vertical_angle_and_index_error(angle("-0 20 0"), angle("0 40 0"));
        assert_eq!(result.place_of_zero.format(), "0°10′0.0″");
        assert_eq!(result.vertical_angle.format(), "-0°30′0.0″");
    }

    #[test]
    fn test_check_circle_difference() {
        let left = angle("10 0 0");
        assert!(check_circle_difference(left, angle("10 1 30"), 2.0));
        assert!(!check_circle_difference(left, angle("10 3 0"), 2.0));
        assert!(check_circle_difference(angle("10 1 30"), left, 2.0));
    }

    #[test]
    fn test_journal_reduce_and_face_checks() {
        let mut journal = TheodoliteJournal::new("Adit 4 traverse");
        journal.add_station(full_station());

        let mut bad = StationMeasurement::new(2, 102, 103);
        bad.set_left_circle_1(Some(angle("0 0 0")));
        bad.set_left_circle_2(Some(angle("120 0 0")));
        bad.set_right_circle_1(Some(angle("0 0 0")));
        bad.set_right_circle_2(Some(angle("239 55 0")));
        journal.add_station(bad);

        journal.add_station(StationMeasurement::new(3, 103, 104));

        assert_eq!(journal.reduce_all(), 2);

        let checks = journal.face_checks(2.0);
        assert_eq!(checks.len(), 2);
        assert!(checks[0].passed);
        assert!(!checks[1].passed);
        assert_eq!(checks[1].difference.format(), "0°5′0.0″");
    }

    #[test]
    fn test_deserialize_recomputes_derived_values() {
        let json = serde_json::to_string(&full_station()).unwrap();
        assert!(json.contains("average_angle"));

        // Tampered derived value is ignored
        let tampered = json.replace("\"station_number\":1", "\"station_number\":7");
        let mut value: serde_json::Value = serde_json::from_str(&tampered).unwrap();
        value["average_angle"] = serde_json::json!(1.0);
        let station: StationMeasurement = serde_json::from_value(value).unwrap();

        assert_eq!(station.station_number, 7);
        assert_eq!(station.average_angle().unwrap().format(), "85°30′15.0″");
    }

    #[test]
    fn test_deserialize_minimal_station() {
        let station: StationMeasurement =
            serde_json::from_str(r#"{ "station_number": 4, "point1": 1, "point2": 2 }"#).unwrap();
        assert!(!station.is_reduced());
        assert_eq!(station.missing_readings().len(), 4);
    }
}
