//! # Inverse Resection (Delambre / Gauss)
//!
//! Locates an unknown station P from horizontal angles measured at P to four
//! or more reference points with known coordinates.
//!
//! ## Conventions
//!
//! - Geodetic axes: `x` is northing, `y` is easting. A directional angle α
//!   is measured clockwise from +x, so `tan α = Δy / Δx`.
//! - `beta_deg` of point *i* is the clockwise angle measured at P from the
//!   sight line to point *i* to the sight line to point *i + 1*.
//!
//! ## Method
//!
//! 1. The directional angle P→P0 comes from the Delambre cotangent formula
//!    over P0, P1, P2, using the angle P0→P1 (β0) and the angle P0→P2
//!    (β0 + β1). The formula fixes the sight line only up to a half turn, so
//!    the orientation toward P0 is chosen explicitly.
//! 2. Every later directional angle is the anchor plus the cumulative β sum.
//! 3. Each index triple is solved with Gauss's cotangent intersection: the
//!    sight line of its first point is intersected with those of the second
//!    and third points and the two intersections are averaged.
//! 4. Two triples give two independent estimates; their spread in
//!    centimetres is the discrepancy, and the midpoint is accepted only when
//!    it is within tolerance.
//!
//! Near-zero denominators (sight lines due north/south, parallel sight
//! lines) are not clamped: they produce non-finite coordinates, which never
//! pass the tolerance check.
//!
//! ## Example
//!
//! ```rust
//! use survey_core::calculations::resection::{calculate, ReferencePoint, ResectionInput};
//!
//! let input = ResectionInput {
//!     points: vec![
//!         ReferencePoint::new(1, "A", 1500.0, 800.0, 53.317649244106),
//!         ReferencePoint::new(2, "B", 900.0, 1600.0, 69.381811876896),
//!         ReferencePoint::new(3, "C", -200.0, 1100.0, 85.601294645004),
//!         ReferencePoint::new(4, "D", -100.0, -100.0, 151.699244233994),
//!     ],
//!     max_discrepancy_cm: 5.0,
//! };
//!
//! let result = calculate(&input, [0, 1, 2], [1, 2, 3]).unwrap();
//! let station = result.final_point.expect("within tolerance");
//! assert!((station.x - 500.0).abs() < 0.01);
//! assert!((station.y - 500.0).abs() < 0.01);
//! ```

use std::f64::consts::{PI, TAU};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::angle::Angle;
use crate::errors::{SurveyError, SurveyResult};

/// Fewest reference points that still give two distinct triples
pub const MIN_REFERENCE_POINTS: usize = 4;

/// Circumcircle determinant below which three points count as collinear
const COLLINEAR_EPSILON: f64 = 1e-10;

/// Three strictly increasing indices into the reference point list
pub type Combination = [usize; 3];

/// A reference point with known coordinates and the β angle measured at the
/// station toward the next point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub id: u32,
    pub name: String,
    /// Northing (m)
    pub x: f64,
    /// Easting (m)
    pub y: f64,
    /// Angle to the next point in sequence, decimal degrees
    pub beta_deg: f64,
}

impl ReferencePoint {
    pub fn new(id: u32, name: impl Into<String>, x: f64, y: f64, beta_deg: f64) -> Self {
        ReferencePoint {
            id,
            name: name.into(),
            x,
            y,
            beta_deg,
        }
    }

    pub fn beta_radians(&self) -> f64 {
        self.beta_deg.to_radians()
    }

    pub fn position(&self) -> PlanePoint {
        PlanePoint::new(self.x, self.y)
    }
}

/// Plane coordinates in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanePoint {
    pub x: f64,
    pub y: f64,
}

impl PlanePoint {
    pub fn new(x: f64, y: f64) -> Self {
        PlanePoint { x, y }
    }

    pub fn distance_to(&self, other: &PlanePoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &PlanePoint) -> PlanePoint {
        PlanePoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Directional angle from the station to a named reference point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionalAngle {
    pub point_name: String,
    /// In [0, 2π)
    pub radians: f64,
}

impl DirectionalAngle {
    pub fn angle(&self) -> Angle {
        Angle::from_radians(self.radians)
    }
}

/// Station estimate from one index triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub combination: Combination,
    pub point_names: Vec<String>,
    pub point: PlanePoint,
}

/// Input set for a resection.
///
/// ## JSON Example
///
/// ```json
/// {
///   "points": [
///     { "id": 1, "name": "A", "x": 1500.0, "y": 800.0, "beta_deg": 53.3176 },
///     { "id": 2, "name": "B", "x": 900.0, "y": 1600.0, "beta_deg": 69.3818 },
///     { "id": 3, "name": "C", "x": -200.0, "y": 1100.0, "beta_deg": 85.6013 },
///     { "id": 4, "name": "D", "x": -100.0, "y": -100.0, "beta_deg": 151.6992 }
///   ],
///   "max_discrepancy_cm": 5.0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResectionInput {
    pub points: Vec<ReferencePoint>,
    /// Largest accepted spread between the two estimates (cm)
    pub max_discrepancy_cm: f64,
}

impl ResectionInput {
    /// Validate input parameters.
    pub fn validate(&self) -> SurveyResult<()> {
        if self.points.len() < MIN_REFERENCE_POINTS {
            return Err(SurveyError::insufficient_data(
                "resection",
                format!(
                    "{} reference points given, at least {} required",
                    self.points.len(),
                    MIN_REFERENCE_POINTS
                ),
            ));
        }
        for point in &self.points {
            if !point.x.is_finite() || !point.y.is_finite() {
                return Err(SurveyError::insufficient_data(
                    "resection",
                    format!("point '{}' has no usable coordinates", point.name),
                ));
            }
            if !point.beta_deg.is_finite() {
                return Err(SurveyError::validation(
                    "beta_deg",
                    point.beta_deg.to_string(),
                    format!("Angle at point '{}' must be a finite number", point.name),
                ));
            }
        }
        if self.max_discrepancy_cm.is_nan() || self.max_discrepancy_cm < 0.0 {
            return Err(SurveyError::validation(
                "max_discrepancy_cm",
                self.max_discrepancy_cm.to_string(),
                "Tolerance must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Results of a two-combination resection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResectionResult {
    /// Directional angles in reference point order
    pub directional_angles: Vec<DirectionalAngle>,

    /// Estimate from the first combination
    pub first: Candidate,

    /// Estimate from the second combination
    pub second: Candidate,

    /// Distance between the two estimates (cm)
    pub discrepancy_cm: f64,

    /// Tolerance the discrepancy was checked against (cm)
    pub max_discrepancy_cm: f64,

    /// Midpoint of the estimates, or `None` when the discrepancy exceeds the
    /// tolerance or could not be computed
    pub final_point: Option<PlanePoint>,

    /// Whether the final point lies inside the circle through the first
    /// combination's points. `false` when there is no final point.
    pub inside_danger_circle: bool,
}

impl ResectionResult {
    pub fn within_tolerance(&self) -> bool {
        self.final_point.is_some()
    }
}

/// All strictly increasing index triples of `0..n` in lexicographic order.
///
/// # Errors
///
/// `InsufficientData` if `n < 3`.
pub fn generate_combinations(n: usize) -> SurveyResult<Vec<Combination>> {
    if n < 3 {
        return Err(SurveyError::insufficient_data(
            "point combinations",
            format!("{} points cannot form a triple", n),
        ));
    }

    let mut combinations = Vec::with_capacity(n * (n - 1) * (n - 2) / 6);
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                combinations.push([i, j, k]);
            }
        }
    }
    Ok(combinations)
}

/// The first and last combination for `n` points, the widest-spread default pair.
pub fn default_combinations(n: usize) -> SurveyResult<(Combination, Combination)> {
    let combinations = generate_combinations(n)?;
    match (combinations.first(), combinations.last()) {
        (Some(&first), Some(&last)) => Ok((first, last)),
        _ => Err(SurveyError::insufficient_data(
            "point combinations",
            format!("{} points cannot form a triple", n),
        )),
    }
}

/// Directional angles from the station to every reference point.
///
/// # Errors
///
/// `InsufficientData` if fewer than three points are given.
pub fn compute_directional_angles(
    points: &[ReferencePoint],
) -> SurveyResult<Vec<DirectionalAngle>> {
    if points.len() < 3 {
        return Err(SurveyError::insufficient_data(
            "directional angles",
            format!("{} points given, the anchor needs 3", points.len()),
        ));
    }

    let anchor = delambre_anchor(&points[0], &points[1], &points[2]);

    let mut angles = Vec::with_capacity(points.len());
    let mut beta_sum = 0.0;
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            beta_sum += points[i - 1].beta_radians();
        }
        let radians = normalize_radians(anchor + beta_sum);
        log::debug!(
            "directional angle to {}: {}",
            point.name,
            Angle::from_radians(radians)
        );
        angles.push(DirectionalAngle {
            point_name: point.name.clone(),
            radians,
        });
    }
    Ok(angles)
}

/// Directional angle station→P0 from the Delambre cotangent formula.
fn delambre_anchor(p0: &ReferencePoint, p1: &ReferencePoint, p2: &ReferencePoint) -> f64 {
    let ctg_01 = cot(p0.beta_radians());
    let ctg_02 = cot(p0.beta_radians() + p1.beta_radians());

    let numerator = (p1.y - p0.y) * ctg_01 + (p0.y - p2.y) * ctg_02 - p1.x + p2.x;
    let denominator = (p1.x - p0.x) * ctg_01 + (p0.x - p2.x) * ctg_02 + p1.y - p2.y;

    let mut alpha = (numerator / denominator).atan();
    if denominator < 0.0 {
        alpha += PI;
    }

    // Signed offset of the station from P0 along alpha; the station lies
    // behind P0 when alpha points from the station toward P0.
    let offset = (p1.x - p0.x) * (alpha.sin() * ctg_01 + alpha.cos())
        - (p1.y - p0.y) * (alpha.cos() * ctg_01 - alpha.sin());
    if offset > 0.0 {
        alpha += PI;
    }

    normalize_radians(alpha)
}

/// Station coordinates from one triple of reference points.
///
/// `angles` must be the directional angles of all `points`, as returned by
/// [`compute_directional_angles`].
///
/// # Errors
///
/// `Validation` if the triple is not strictly increasing or indexes past the
/// point list, or if `angles` does not match `points`.
pub fn solve_combination(
    points: &[ReferencePoint],
    angles: &[DirectionalAngle],
    combination: Combination,
) -> SurveyResult<PlanePoint> {
    check_combination(combination, points.len())?;
    if angles.len() != points.len() {
        return Err(SurveyError::validation(
            "directional_angles",
            angles.len().to_string(),
            format!("Expected one directional angle per point ({})", points.len()),
        ));
    }

    let [i, j, k] = combination;
    let via_second =
        gauss_intersection(&points[i], angles[i].radians, &points[j], angles[j].radians);
    let via_third =
        gauss_intersection(&points[i], angles[i].radians, &points[k], angles[k].radians);
    Ok(via_second.midpoint(&via_third))
}

/// Intersection of the sight lines through `a` and `b` (cotangent form).
fn gauss_intersection(
    a: &ReferencePoint,
    alpha_a: f64,
    b: &ReferencePoint,
    alpha_b: f64,
) -> PlanePoint {
    let ctg_a = cot(alpha_a);
    let ctg_b = cot(alpha_b);

    let y = a.y + ((b.x - a.x) - (b.y - a.y) * ctg_b) / (ctg_a - ctg_b);
    let x = a.x + (y - a.y) * ctg_a;
    PlanePoint::new(x, y)
}

fn check_combination(combination: Combination, point_count: usize) -> SurveyResult<()> {
    let [i, j, k] = combination;
    if !(i < j && j < k) {
        return Err(SurveyError::validation(
            "combination",
            format!("{:?}", combination),
            "Indices must be strictly increasing",
        ));
    }
    if k >= point_count {
        return Err(SurveyError::validation(
            "combination",
            format!("{:?}", combination),
            format!("Index {} is out of range for {} points", k, point_count),
        ));
    }
    Ok(())
}

/// Whether `point` lies strictly inside the circle through `p1`, `p2`, `p3`.
///
/// Collinear reference points have no circle; the answer is then `false`.
pub fn check_danger_circle(
    point: PlanePoint,
    p1: PlanePoint,
    p2: PlanePoint,
    p3: PlanePoint,
) -> bool {
    let (x1, y1, x2, y2, x3, y3) = (p1.x, p1.y, p2.x, p2.y, p3.x, p3.y);
    let s1 = x1 * x1 + y1 * y1;
    let s2 = x2 * x2 + y2 * y2;
    let s3 = x3 * x3 + y3 * y3;

    let a = x1 * (y2 - y3) - y1 * (x2 - x3) + x2 * y3 - x3 * y2;
    if a.abs() < COLLINEAR_EPSILON {
        return false;
    }
    let b = s1 * (y3 - y2) + s2 * (y1 - y3) + s3 * (y2 - y1);
    let c = s1 * (x2 - x3) + s2 * (x3 - x1) + s3 * (x1 - x2);

    let center = PlanePoint::new(-b / (2.0 * a), -c / (2.0 * a));
    let radius = center.distance_to(&p1);

    center.distance_to(&point) < radius
}

/// Run a full resection with two point combinations.
///
/// # Arguments
///
/// * `input` - Reference points and tolerance
/// * `first` / `second` - Triples from [`generate_combinations`]; they may
///   share points
///
/// # Errors
///
/// * `InsufficientData` - fewer than 4 points or unusable coordinates
/// * `Validation` - bad tolerance, β or combination
pub fn calculate(
    input: &ResectionInput,
    first: Combination,
    second: Combination,
) -> SurveyResult<ResectionResult> {
    input.validate()?;

    let directional_angles = compute_directional_angles(&input.points)?;
    let first = candidate(&input.points, &directional_angles, first)?;
    let second = candidate(&input.points, &directional_angles, second)?;

    let discrepancy_cm = 100.0 * first.point.distance_to(&second.point);
    log::debug!(
        "resection estimates ({:.4}, {:.4}) and ({:.4}, {:.4}), discrepancy {:.2} cm",
        first.point.x,
        first.point.y,
        second.point.x,
        second.point.y,
        discrepancy_cm
    );

    let final_point = if discrepancy_cm <= input.max_discrepancy_cm {
        Some(first.point.midpoint(&second.point))
    } else {
        if first.point.is_finite() && second.point.is_finite() {
            log::warn!(
                "resection discrepancy {:.2} cm exceeds tolerance {:.2} cm",
                discrepancy_cm,
                input.max_discrepancy_cm
            );
        } else {
            log::warn!("resection estimates are undefined for the chosen combinations");
        }
        None
    };

    let inside_danger_circle = match final_point {
        Some(point) => {
            let [i, j, k] = first.combination;
            check_danger_circle(
                point,
                input.points[i].position(),
                input.points[j].position(),
                input.points[k].position(),
            )
        }
        None => false,
    };
    if inside_danger_circle {
        log::warn!("resection station lies inside the danger circle of {:?}", first.point_names);
    }

    Ok(ResectionResult {
        directional_angles,
        first,
        second,
        discrepancy_cm,
        max_discrepancy_cm: input.max_discrepancy_cm,
        final_point,
        inside_danger_circle,
    })
}

fn candidate(
    points: &[ReferencePoint],
    angles: &[DirectionalAngle],
    combination: Combination,
) -> SurveyResult<Candidate> {
    let point = solve_combination(points, angles, combination)?;
    Ok(Candidate {
        combination,
        point_names: combination.iter().map(|&i| points[i].name.clone()).collect(),
        point,
    })
}

fn cot(radians: f64) -> f64 {
    1.0 / radians.tan()
}

fn normalize_radians(radians: f64) -> f64 {
    let value = radians.rem_euclid(TAU);
    if value >= TAU {
        value - TAU
    } else {
        value
    }
}

/// A saved resection: named input set plus its latest solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResectionJob {
    /// Assigned by the project on first save
    pub id: Option<u32>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub input: ResectionInput,
    /// Combinations used for the latest solution
    pub combinations: Option<(Combination, Combination)>,
    pub result: Option<ResectionResult>,
}

impl ResectionJob {
    pub fn new(name: impl Into<String>, max_discrepancy_cm: f64) -> Self {
        ResectionJob {
            id: None,
            name: name.into(),
            created_at: Utc::now(),
            input: ResectionInput {
                points: Vec::new(),
                max_discrepancy_cm,
            },
            combinations: None,
            result: None,
        }
    }

    /// Append a reference point. Any previous solution is discarded.
    pub fn add_point(&mut self, point: ReferencePoint) {
        self.input.points.push(point);
        self.result = None;
    }

    pub fn has_minimum_points(&self) -> bool {
        self.input.points.len() >= MIN_REFERENCE_POINTS
    }

    /// Solve with the given combinations and keep the result.
    pub fn solve(
        &mut self,
        first: Combination,
        second: Combination,
    ) -> SurveyResult<&ResectionResult> {
        let result = calculate(&self.input, first, second)?;
        self.combinations = Some((first, second));
        Ok(self.result.insert(result))
    }
}
