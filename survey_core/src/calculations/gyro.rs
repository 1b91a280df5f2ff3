//! # Gyro Azimuth Pipeline
//!
//! Derives a gyroscopic azimuth from gyrotheodolite observations in five
//! ordered stages. Each stage reads the outputs of earlier stages from the
//! same [`GyroMeasurement`] and writes its own outputs back.
//!
//! | Stage | Inputs | Outputs |
//! |-------|--------|---------|
//! | [`torsion_zero`] | n1..n4 (scale divisions) | n0′, n0″, n0 |
//! | [`equilibrium`] | N1..N4 | N0′, N0″, N0 |
//! | [`bearing_reference`] | KL1, KP1, KL2, KP2 | N′, N″, N |
//! | [`torsion_correction`] | nk, t, D, Nk′, Nk″, n0, N0 | Nk, ψt, ψk, ε |
//! | [`azimuth`] | N, N0, ε | Γ |
//!
//! ## Formulas
//!
//! - Weighted half-set means: `x′ = (x1 + 2·x2 + x3) / 4`,
//!   `x″ = (x2 + 2·x3 + x4) / 4`, `x = (x′ + x″) / 2`
//! - `ψt = t · (n0 − nk)`, `ψk = Nk − N0`, `ε = (ψt + ψk) / D`
//! - `Γ = N − N0 + ε`, reduced into [0°, 360°)
//!
//! All arithmetic is done on decimal degrees; sexagesimal text is produced
//! only when a value is displayed.
//!
//! ## Tolerances
//!
//! Every stage returns a list of [`ToleranceCheck`]s. Checks are advisory:
//! a failed check is logged with `log::warn!` and reported, but the stage
//! still stores its outputs.
//!
//! A stage whose inputs or prerequisites are missing returns
//! `MissingPrerequisite` and clears its own outputs. No default is ever
//! substituted for a missing value.
//!
//! ## Example
//!
//! ```rust
//! use survey_core::calculations::gyro::{
//!     calculate_all, GyroDefaults, GyroMeasurement, GyroTolerances,
//! };
//!
//! let mut m = GyroMeasurement::new("Shaft 2", &GyroDefaults::default());
//! m.torsion_zero.readings = [Some(12.0), Some(-8.0), Some(11.0), Some(-9.0)];
//! m.equilibrium.readings = [
//!     Some("45 10 0".parse().unwrap()),
//!     Some("44 50 0".parse().unwrap()),
//!     Some("45 9 0".parse().unwrap()),
//!     Some("44 51 20".parse().unwrap()),
//! ];
//! m.bearing.kl1 = Some("120 0 10".parse().unwrap());
//! m.bearing.kp1 = Some("300 0 20".parse().unwrap());
//! m.bearing.kl2 = Some("120 0 20".parse().unwrap());
//! m.bearing.kp2 = Some("300 0 30".parse().unwrap());
//! m.torsion_correction.nk = Some(40.0);
//! m.torsion_correction.nk_prime = Some("45 10 0".parse().unwrap());
//! m.torsion_correction.nk_double_prime = Some("45 10 4".parse().unwrap());
//!
//! let checks = calculate_all(&mut m, &GyroTolerances::default()).unwrap();
//! assert!(checks.iter().all(|c| c.passed));
//! assert_eq!(m.azimuth.unwrap().format(), "74°32′17.0″");
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::angle::Angle;
use crate::errors::{SurveyError, SurveyResult};

/// Slack for comparisons against tolerance limits (same unit as the limit)
const LIMIT_EPSILON: f64 = 1e-9;

// ============================================================================
// Configuration
// ============================================================================

/// Instrument defaults copied into every new measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GyroDefaults {
    /// Instrument constant D
    pub instrument_constant: f64,
    /// Torsion rate t (angle per scale division)
    pub torsion_rate: Angle,
}

impl Default for GyroDefaults {
    fn default() -> Self {
        GyroDefaults {
            instrument_constant: 1.0,
            torsion_rate: Angle::from_decimal_degrees(1.0 / 60.0),
        }
    }
}

/// Advisory observation limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyroTolerances {
    /// |n0′ − n0″| (divisions)
    pub torsion_half_sets: f64,
    /// |ni − n0| (divisions)
    pub torsion_spread: f64,
    /// |N0′ − N0″| (arc-seconds)
    pub equilibrium_half_sets_sec: f64,
    /// |N′ − N″| (arc-seconds)
    pub bearing_half_sets_sec: f64,
    /// |Nk′ − Nk″| (arc-seconds)
    pub nk_half_sets_sec: f64,
    /// |ψk| (degrees)
    pub psi_k_deg: f64,
}

impl Default for GyroTolerances {
    fn default() -> Self {
        GyroTolerances {
            torsion_half_sets: 1.0,
            torsion_spread: 40.0,
            equilibrium_half_sets_sec: 30.0,
            bearing_half_sets_sec: 30.0,
            nk_half_sets_sec: 6.0,
            psi_k_deg: 1.0,
        }
    }
}

// ============================================================================
// Tolerance reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToleranceUnit {
    Divisions,
    ArcSeconds,
    Degrees,
}

impl ToleranceUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            ToleranceUnit::Divisions => "div",
            ToleranceUnit::ArcSeconds => "″",
            ToleranceUnit::Degrees => "°",
        }
    }
}

/// Outcome of one advisory check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceCheck {
    pub name: String,
    pub value: f64,
    pub limit: f64,
    pub unit: ToleranceUnit,
    pub passed: bool,
}

impl ToleranceCheck {
    /// Build a check of `value <= limit`, logging a warning when it fails.
    pub fn new(name: impl Into<String>, value: f64, limit: f64, unit: ToleranceUnit) -> Self {
        let check = ToleranceCheck {
            name: name.into(),
            value,
            limit,
            unit,
            passed: value <= limit + LIMIT_EPSILON,
        };
        if !check.passed {
            log::warn!("tolerance exceeded: {}", check);
        }
        check
    }
}

impl fmt::Display for ToleranceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.symbol();
        write!(
            f,
            "{} = {:.2}{} (limit {}{}) {}",
            self.name,
            self.value,
            unit,
            self.limit,
            unit,
            if self.passed { "ok" } else { "EXCEEDED" }
        )
    }
}

// ============================================================================
// Measurement record
// ============================================================================

/// Stage 1: zero of torsion, on the raw numeric scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorsionZero {
    /// n1..n4
    pub readings: [Option<f64>; 4],
    pub n0_prime: Option<f64>,
    pub n0_double_prime: Option<f64>,
    pub n0: Option<f64>,
}

impl TorsionZero {
    fn clear_outputs(&mut self) {
        self.n0_prime = None;
        self.n0_double_prime = None;
        self.n0 = None;
    }
}

/// Stage 2: equilibrium position of the sensing element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Equilibrium {
    /// N1..N4
    pub readings: [Option<Angle>; 4],
    pub n0_prime: Option<Angle>,
    pub n0_double_prime: Option<Angle>,
    pub n0: Option<Angle>,
}

impl Equilibrium {
    fn clear_outputs(&mut self) {
        self.n0_prime = None;
        self.n0_double_prime = None;
        self.n0 = None;
    }
}

/// Stage 3: bearing reference from two dual-face pointings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BearingReference {
    pub kl1: Option<Angle>,
    pub kp1: Option<Angle>,
    pub kl2: Option<Angle>,
    pub kp2: Option<Angle>,
    pub n_prime: Option<Angle>,
    pub n_double_prime: Option<Angle>,
    pub n: Option<Angle>,
}

impl BearingReference {
    fn clear_outputs(&mut self) {
        self.n_prime = None;
        self.n_double_prime = None;
        self.n = None;
    }
}

/// Stage 4: torsion correction.
///
/// Absent `torsion_rate` and `instrument_constant` fall back to
/// [`GyroDefaults::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorsionCorrection {
    /// Torsion reading at the end of the run (divisions)
    pub nk: Option<f64>,
    /// t
    pub torsion_rate: Angle,
    /// D
    pub instrument_constant: f64,
    pub nk_prime: Option<Angle>,
    pub nk_double_prime: Option<Angle>,

    pub nk_mean: Option<Angle>,
    pub psi_t: Option<Angle>,
    pub psi_k: Option<Angle>,
    pub epsilon: Option<Angle>,
}

impl Default for TorsionCorrection {
    fn default() -> Self {
        TorsionCorrection::new(&GyroDefaults::default())
    }
}

impl TorsionCorrection {
    fn new(defaults: &GyroDefaults) -> Self {
        TorsionCorrection {
            nk: None,
            torsion_rate: defaults.torsion_rate,
            instrument_constant: defaults.instrument_constant,
            nk_prime: None,
            nk_double_prime: None,
            nk_mean: None,
            psi_t: None,
            psi_k: None,
            epsilon: None,
        }
    }

    fn clear_outputs(&mut self) {
        self.nk_mean = None;
        self.psi_t = None;
        self.psi_k = None;
        self.epsilon = None;
    }
}

/// A gyrotheodolite observation set and its stage outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GyroMeasurement {
    /// Assigned by the project on first save
    #[serde(default)]
    pub id: Option<u32>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub torsion_zero: TorsionZero,
    #[serde(default)]
    pub equilibrium: Equilibrium,
    #[serde(default)]
    pub bearing: BearingReference,
    #[serde(default)]
    pub torsion_correction: TorsionCorrection,
    /// Γ
    #[serde(default)]
    pub azimuth: Option<Angle>,
}

impl GyroMeasurement {
    pub fn new(name: impl Into<String>, defaults: &GyroDefaults) -> Self {
        GyroMeasurement {
            id: None,
            name: name.into(),
            created_at: Utc::now(),
            torsion_zero: TorsionZero::default(),
            equilibrium: Equilibrium::default(),
            bearing: BearingReference::default(),
            torsion_correction: TorsionCorrection::new(defaults),
            azimuth: None,
        }
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Weighted half-set means of four successive readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedMean {
    pub first: f64,
    pub second: f64,
    pub mean: f64,
}

/// `x′ = (x1 + 2x2 + x3)/4`, `x″ = (x2 + 2x3 + x4)/4`, `x = (x′ + x″)/2`
pub fn weighted_mean(readings: [f64; 4]) -> WeightedMean {
    let [x1, x2, x3, x4] = readings;
    let first = (x1 + 2.0 * x2 + x3) / 4.0;
    let second = (x2 + 2.0 * x3 + x4) / 4.0;
    WeightedMean {
        first,
        second,
        mean: (first + second) / 2.0,
    }
}

/// Mean of a left-face and right-face reading, with the right-face reading
/// first brought onto the left face (modulo 180°). The result lies in
/// [0°, 360°).
pub fn face_mean(left: Angle, right: Angle) -> Angle {
    let offset = (right - left).decimal_degrees();
    let reduced = offset - 180.0 * (offset / 180.0).round();
    (left + Angle::from_decimal_degrees(reduced / 2.0)).normalized()
}

/// Smallest signed difference `a − b`, in (−180°, 180°].
pub fn signed_difference(a: Angle, b: Angle) -> Angle {
    let mut d = (a - b).decimal_degrees().rem_euclid(360.0);
    if d > 180.0 {
        d -= 360.0;
    }
    Angle::from_decimal_degrees(d)
}

/// ψt = t · (n0 − nk)
pub fn torsion_twist(torsion_rate: Angle, n0: f64, nk: f64) -> Angle {
    torsion_rate * (n0 - nk)
}

/// Γ = N − N0 + ε, reduced into [0°, 360°).
pub fn gyro_azimuth(n: Angle, n0: Angle, epsilon: Angle) -> Angle {
    (n - n0 + epsilon).normalized()
}

fn require<T: Copy>(
    value: Option<T>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<T> {
    if value.is_none() {
        missing.push(name);
    }
    value
}

fn missing_error(stage: &str, missing: &[&str]) -> SurveyError {
    SurveyError::missing_prerequisite(stage, missing.join(", "))
}

// ============================================================================
// Stages
// ============================================================================

/// Stage 1: zero of torsion.
pub fn torsion_zero(
    m: &mut GyroMeasurement,
    tolerances: &GyroTolerances,
) -> SurveyResult<Vec<ToleranceCheck>> {
    let stage = &mut m.torsion_zero;
    let mut missing = Vec::new();
    let names = ["n1", "n2", "n3", "n4"];
    let mut readings = [0.0; 4];
    for (i, &name) in names.iter().enumerate() {
        if let Some(value) = require(stage.readings[i], name, &mut missing) {
            readings[i] = value;
        }
    }
    if !missing.is_empty() {
        stage.clear_outputs();
        return Err(missing_error("torsion zero", &missing));
    }

    let result = weighted_mean(readings);
    stage.n0_prime = Some(result.first);
    stage.n0_double_prime = Some(result.second);
    stage.n0 = Some(result.mean);
    log::debug!(
        "torsion zero: n0' = {:.3}, n0'' = {:.3}, n0 = {:.3}",
        result.first,
        result.second,
        result.mean
    );

    let mut checks = vec![ToleranceCheck::new(
        "|n0' - n0''|",
        (result.first - result.second).abs(),
        tolerances.torsion_half_sets,
        ToleranceUnit::Divisions,
    )];
    for (name, value) in names.iter().zip(readings) {
        checks.push(ToleranceCheck::new(
            format!("|{} - n0|", name),
            (value - result.mean).abs(),
            tolerances.torsion_spread,
            ToleranceUnit::Divisions,
        ));
    }
    Ok(checks)
}

/// Stage 2: equilibrium position.
pub fn equilibrium(
    m: &mut GyroMeasurement,
    tolerances: &GyroTolerances,
) -> SurveyResult<Vec<ToleranceCheck>> {
    let stage = &mut m.equilibrium;
    let mut missing = Vec::new();
    let mut readings = [0.0; 4];
    for (i, &name) in ["N1", "N2", "N3", "N4"].iter().enumerate() {
        if let Some(angle) = require(stage.readings[i], name, &mut missing) {
            readings[i] = angle.decimal_degrees();
        }
    }
    if !missing.is_empty() {
        stage.clear_outputs();
        return Err(missing_error("equilibrium", &missing));
    }

    let result = weighted_mean(readings);
    let first = Angle::from_decimal_degrees(result.first);
    let second = Angle::from_decimal_degrees(result.second);
    let n0 = Angle::from_decimal_degrees(result.mean);
    stage.n0_prime = Some(first);
    stage.n0_double_prime = Some(second);
    stage.n0 = Some(n0);
    log::debug!("equilibrium: N0' = {}, N0'' = {}, N0 = {}", first, second, n0);

    Ok(vec![ToleranceCheck::new(
        "|N0' - N0''|",
        (first - second).abs().arc_seconds(),
        tolerances.equilibrium_half_sets_sec,
        ToleranceUnit::ArcSeconds,
    )])
}

/// Stage 3: bearing reference.
pub fn bearing_reference(
    m: &mut GyroMeasurement,
    tolerances: &GyroTolerances,
) -> SurveyResult<Vec<ToleranceCheck>> {
    let stage = &mut m.bearing;
    let mut missing = Vec::new();
    let kl1 = require(stage.kl1, "KL1", &mut missing);
    let kp1 = require(stage.kp1, "KP1", &mut missing);
    let kl2 = require(stage.kl2, "KL2", &mut missing);
    let kp2 = require(stage.kp2, "KP2", &mut missing);
    let (Some(kl1), Some(kp1), Some(kl2), Some(kp2)) = (kl1, kp1, kl2, kp2) else {
        stage.clear_outputs();
        return Err(missing_error("bearing reference", &missing));
    };

    let n_prime = face_mean(kl1, kp1);
    let n_double_prime = face_mean(kl2, kp2);
    let spread = signed_difference(n_prime, n_double_prime);
    let n = (n_double_prime + spread / 2.0).normalized();
    stage.n_prime = Some(n_prime);
    stage.n_double_prime = Some(n_double_prime);
    stage.n = Some(n);
    log::debug!("bearing reference: N' = {}, N'' = {}, N = {}", n_prime, n_double_prime, n);

    Ok(vec![ToleranceCheck::new(
        "|N' - N''|",
        spread.abs().arc_seconds(),
        tolerances.bearing_half_sets_sec,
        ToleranceUnit::ArcSeconds,
    )])
}

/// Stage 4: torsion correction.
///
/// # Errors
///
/// * `Validation` - the instrument constant is zero or not finite
/// * `MissingPrerequisite` - nk, Nk′, Nk″, n0 (stage 1) or N0 (stage 2) absent
pub fn torsion_correction(
    m: &mut GyroMeasurement,
    tolerances: &GyroTolerances,
) -> SurveyResult<Vec<ToleranceCheck>> {
    let n0 = m.torsion_zero.n0;
    let equilibrium_n0 = m.equilibrium.n0;
    let stage = &mut m.torsion_correction;

    let d = stage.instrument_constant;
    if !d.is_finite() || d == 0.0 {
        stage.clear_outputs();
        return Err(SurveyError::validation(
            "instrument_constant",
            d.to_string(),
            "Instrument constant must be finite and non-zero",
        ));
    }

    let mut missing = Vec::new();
    let nk = require(stage.nk, "nk", &mut missing);
    let nk_prime = require(stage.nk_prime, "Nk'", &mut missing);
    let nk_double_prime = require(stage.nk_double_prime, "Nk''", &mut missing);
    let n0 = require(n0, "n0", &mut missing);
    let equilibrium_n0 = require(equilibrium_n0, "N0", &mut missing);
    let (Some(nk), Some(nk_prime), Some(nk_double_prime), Some(n0), Some(equilibrium_n0)) =
        (nk, nk_prime, nk_double_prime, n0, equilibrium_n0)
    else {
        stage.clear_outputs();
        return Err(missing_error("torsion correction", &missing));
    };

    let psi_t = torsion_twist(stage.torsion_rate, n0, nk);
    let nk_mean = Angle::mean(nk_prime, nk_double_prime);
    let psi_k = nk_mean - equilibrium_n0;
    let epsilon = (psi_t + psi_k) / d;
    stage.nk_mean = Some(nk_mean);
    stage.psi_t = Some(psi_t);
    stage.psi_k = Some(psi_k);
    stage.epsilon = Some(epsilon);
    log::debug!(
        "torsion correction: psi_t = {}, Nk = {}, psi_k = {}, epsilon = {}",
        psi_t,
        nk_mean,
        psi_k,
        epsilon
    );

    Ok(vec![
        ToleranceCheck::new(
            "|Nk' - Nk''|",
            (nk_prime - nk_double_prime).abs().arc_seconds(),
            tolerances.nk_half_sets_sec,
            ToleranceUnit::ArcSeconds,
        ),
        ToleranceCheck::new(
            "|psi_k|",
            psi_k.abs().decimal_degrees(),
            tolerances.psi_k_deg,
            ToleranceUnit::Degrees,
        ),
    ])
}

/// Stage 5: gyroscopic azimuth.
pub fn azimuth(m: &mut GyroMeasurement) -> SurveyResult<Vec<ToleranceCheck>> {
    let mut missing = Vec::new();
    let n = require(m.bearing.n, "N", &mut missing);
    let n0 = require(m.equilibrium.n0, "N0", &mut missing);
    let epsilon = require(m.torsion_correction.epsilon, "epsilon", &mut missing);
    let (Some(n), Some(n0), Some(epsilon)) = (n, n0, epsilon) else {
        m.azimuth = None;
        return Err(missing_error("azimuth", &missing));
    };

    let gamma = gyro_azimuth(n, n0, epsilon);
    log::debug!("azimuth: {} - {} + {} = {}", n, n0, epsilon, gamma);
    m.azimuth = Some(gamma);
    Ok(Vec::new())
}

/// Run all five stages in order, returning every tolerance check.
///
/// Stops at the first stage that cannot run; outputs of the stages before
/// it are kept.
pub fn calculate_all(
    m: &mut GyroMeasurement,
    tolerances: &GyroTolerances,
) -> SurveyResult<Vec<ToleranceCheck>> {
    let mut checks = torsion_zero(m, tolerances)?;
    checks.extend(equilibrium(m, tolerances)?);
    checks.extend(bearing_reference(m, tolerances)?);
    checks.extend(torsion_correction(m, tolerances)?);
    checks.extend(azimuth(m)?);
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn angle(text: &str) -> Angle {
        text.parse().unwrap()
    }

    fn observed() -> GyroMeasurement {
        let mut m = GyroMeasurement::new("Shaft 2", &GyroDefaults::default());
        m.torsion_zero.readings = [Some(12.0), Some(-8.0), Some(11.0), Some(-9.0)];
        m.equilibrium.readings = [
            Some(angle("45 10 0")),
            Some(angle("44 50 0")),
            Some(angle("45 9 0")),
            Some(angle("44 51 20")),
        ];
        m.bearing.kl1 = Some(angle("120 0 10"));
        m.bearing.kp1 = Some(angle("300 0 20"));
        m.bearing.kl2 = Some(angle("120 0 20"));
        m.bearing.kp2 = Some(angle("300 0 30"));
        m.torsion_correction.nk = Some(40.0);
        m.torsion_correction.nk_prime = Some(angle("45 10 0"));
        m.torsion_correction.nk_double_prime = Some(angle("45 10 4"));
        m
    }

    #[test]
    fn test_weighted_mean() {
        let result = weighted_mean([12.0, -8.0, 11.0, -9.0]);
        assert_abs_diff_eq!(result.first, 1.75);
        assert_abs_diff_eq!(result.second, 1.25);
        assert_abs_diff_eq!(result.mean, 1.5);
    }

    #[test]
    fn test_torsion_twist() {
        let psi_t = torsion_twist(angle("0 1 0"), 10.0, 40.0);
        assert_abs_diff_eq!(psi_t.decimal_degrees(), -0.5, epsilon = 1e-12);
        assert_eq!(psi_t.format(), "-0°30′0.0″");
    }

    #[test]
    fn test_gyro_azimuth_normalization() {
        let gamma = gyro_azimuth(angle("10 0 0"), angle("350 0 0"), angle("5 0 0"));
        assert_abs_diff_eq!(gamma.decimal_degrees(), 25.0, epsilon = 1e-12);

        let gamma = gyro_azimuth(angle("350 0 0"), angle("10 0 0"), angle("30 0 0"));
        assert_abs_diff_eq!(gamma.decimal_degrees(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_face_mean() {
        assert_eq!(face_mean(angle("120 0 10"), angle("300 0 20")).format(), "120°0′15.0″");
        assert_eq!(face_mean(angle("120 0 10"), angle("120 0 20")).format(), "120°0′15.0″");
        assert_eq!(face_mean(angle("359 59 50"), angle("180 0 10")).format(), "0°0′0.0″");
        assert_eq!(face_mean(angle("359 59 50"), angle("180 0 10")).decimal_degrees(), 0.0);
    }

    #[test]
    fn test_minimal_record_uses_instrument_defaults() {
        let defaults = TorsionCorrection::default();
        assert_eq!(defaults.torsion_rate.format(), "0°1′0.0″");
        assert_abs_diff_eq!(defaults.instrument_constant, 1.0);

        let json = r#"{
            "name": "g",
            "created_at": "2024-05-01T08:00:00Z",
            "torsion_correction": {"nk": 40.0}
        }"#;
        let m: GyroMeasurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.torsion_correction.nk, Some(40.0));
        assert_eq!(m.torsion_correction.torsion_rate, defaults.torsion_rate);
        assert_abs_diff_eq!(m.torsion_correction.instrument_constant, 1.0);
        assert_eq!(m.torsion_correction.epsilon, None);

        let json = r#"{"name": "g", "created_at": "2024-05-01T08:00:00Z"}"#;
        let m: GyroMeasurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.torsion_correction, defaults);
        assert_eq!(m.azimuth, None);
    }

    #[test]
    fn test_full_pipeline() {
        let mut m = observed();
        let checks = calculate_all(&mut m, &GyroTolerances::default()).unwrap();

        // 5 torsion-zero, 1 equilibrium, 1 bearing, 2 torsion correction
        assert_eq!(checks.len(), 9);
        assert!(checks.iter().all(|c| c.passed));

        assert_abs_diff_eq!(m.torsion_zero.n0.unwrap(), 1.5);
        assert_eq!(m.equilibrium.n0.unwrap().format(), "44°59′47.5″");
        assert_eq!(m.bearing.n_prime.unwrap().format(), "120°0′15.0″");
        assert_eq!(m.bearing.n.unwrap().format(), "120°0′20.0″");

        let tc = &m.torsion_correction;
        assert_eq!(tc.psi_t.unwrap().format(), "-0°38′30.0″");
        assert_eq!(tc.nk_mean.unwrap().format(), "45°10′2.0″");
        assert_eq!(tc.psi_k.unwrap().format(), "0°10′14.5″");
        assert_eq!(tc.epsilon.unwrap().format(), "-0°28′15.5″");

        assert_eq!(m.azimuth.unwrap().format(), "74°32′17.0″");
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let mut m = observed();
        calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        let first = m.azimuth.unwrap();
        calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        assert_eq!(m.azimuth.unwrap(), first);
    }

    #[test]
    fn test_stored_values_survive_json() {
        let mut m = observed();
        calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        let mut loaded: GyroMeasurement = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, m);

        azimuth(&mut loaded).unwrap();
        assert_eq!(loaded.azimuth, m.azimuth);
    }

    #[test]
    fn test_failed_tolerances_do_not_block() {
        let mut m = observed();
        m.torsion_zero.readings = [Some(30.0), Some(-8.0), Some(11.0), Some(-45.0)];
        m.torsion_correction.nk_double_prime = Some(angle("45 10 30"));

        let checks = calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(failed, vec!["|n0' - n0''|", "|n4 - n0|", "|Nk' - Nk''|"]);
        assert!(m.azimuth.is_some());
    }

    #[test]
    fn test_psi_k_limit() {
        let mut m = observed();
        m.torsion_correction.nk_prime = Some(angle("46 30 0"));
        m.torsion_correction.nk_double_prime = Some(angle("46 30 0"));
        let checks = calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        let psi_k = checks.iter().find(|c| c.name == "|psi_k|").unwrap();
        assert!(!psi_k.passed);
        assert_eq!(psi_k.unit, ToleranceUnit::Degrees);
    }

    #[test]
    fn test_missing_prerequisite_leaves_outputs_unset() {
        let mut m = GyroMeasurement::new("empty", &GyroDefaults::default());
        m.torsion_correction.nk = Some(40.0);
        let err = torsion_correction(&mut m, &GyroTolerances::default()).unwrap_err();
        match err {
            SurveyError::MissingPrerequisite { stage, missing } => {
                assert_eq!(stage, "torsion correction");
                assert_eq!(missing, "Nk', Nk'', n0, N0");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(m.torsion_correction.psi_t.is_none());
        assert!(m.torsion_correction.epsilon.is_none());

        assert!(matches!(azimuth(&mut m), Err(SurveyError::MissingPrerequisite { .. })));
        assert!(m.azimuth.is_none());
    }

    #[test]
    fn test_failed_stage_clears_previous_outputs() {
        let mut m = observed();
        calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        m.bearing.kp2 = None;

        let err = calculate_all(&mut m, &GyroTolerances::default()).unwrap_err();
        assert!(err.to_string().contains("KP2"));
        assert!(m.bearing.n.is_none());
        // Earlier stages still hold their outputs
        assert!(m.equilibrium.n0.is_some());
    }

    #[test]
    fn test_zero_instrument_constant_is_rejected() {
        let mut m = observed();
        m.torsion_correction.instrument_constant = 0.0;
        let err = calculate_all(&mut m, &GyroTolerances::default()).unwrap_err();
        assert!(matches!(err, SurveyError::Validation { .. }));
        assert!(m.torsion_correction.epsilon.is_none());
    }

    #[test]
    fn test_instrument_constant_scales_epsilon() {
        let mut m = observed();
        m.torsion_correction.instrument_constant = 2.0;
        calculate_all(&mut m, &GyroTolerances::default()).unwrap();
        let epsilon = m.torsion_correction.epsilon.unwrap();
        assert_abs_diff_eq!(epsilon.arc_seconds(), -1695.5 / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_defaults() {
        let m = GyroMeasurement::new("defaults", &GyroDefaults::default());
        assert_eq!(m.torsion_correction.torsion_rate.format(), "0°1′0.0″");
        assert_abs_diff_eq!(m.torsion_correction.instrument_constant, 1.0);
        assert!(m.torsion_correction.nk.is_none());
    }
}
