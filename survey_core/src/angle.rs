//! # Sexagesimal Angles
//!
//! `Angle` is the value type every survey computation reads and writes.
//!
//! ## Representation
//!
//! The canonical value is a signed decimal-degree `f64`. Degrees, minutes and
//! seconds are derived from it only for display ([`Angle::to_dms`]), so a
//! negative angle smaller than one degree (e.g. `-0°30′0.0″`) keeps its sign
//! and intermediate values never pick up rounding drift from repeated
//! decimal/sexagesimal conversion.
//!
//! Serialized form is the bare decimal-degree number.
//!
//! ## Text Grammar
//!
//! `parse` accepts degrees, minutes and seconds separated by any of
//! `°`, `′`, `″`, `'`, `"`, `:` or whitespace, with `,` as an alternative
//! decimal mark:
//!
//! ```text
//! 123°45′06.7″    123 45 6,7    123:45:6.7    -0 30 0
//! ```
//!
//! Degrees must be an integer, minutes an integer in [0, 60), seconds a real
//! in [0, 60). Minutes and seconds are optional.
//!
//! ## Example
//!
//! ```rust
//! use survey_core::angle::Angle;
//!
//! let a: Angle = "10°30′0″".parse().unwrap();
//! assert_eq!(a.decimal_degrees(), 10.5);
//!
//! let half_minute_back = Angle::from_decimal_degrees(-0.5);
//! assert_eq!(half_minute_back.format(), "-0°30′0.0″");
//! ```

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{SurveyError, SurveyResult};

/// Tenths of an arc-second in one degree (display resolution is 0.1″)
const TENTHS_PER_DEGREE: f64 = 36_000.0;

/// Tenths of an arc-second in one minute
const TENTHS_PER_MINUTE: f64 = 600.0;

/// An angle stored as signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Angle(f64);

/// Display decomposition of an [`Angle`], rounded to 0.1″.
///
/// Minutes and seconds are never negative; the sign lives in `negative`, so
/// it survives even when `degrees` is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub negative: bool,
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl Dms {
    /// Degrees with the sign applied.
    ///
    /// For sub-degree negatives this is `0` and the sign is only available
    /// through [`Dms::negative`].
    pub fn signed_degrees(&self) -> i32 {
        let degrees = self.degrees as i32;
        if self.negative {
            -degrees
        } else {
            degrees
        }
    }
}

impl Angle {
    pub const ZERO: Angle = Angle(0.0);
    pub const FULL_CIRCLE: Angle = Angle(360.0);

    /// Build an angle from degrees, minutes and seconds.
    ///
    /// The sign of the whole angle comes from `degrees`, so `0°30′` is always
    /// positive. Use [`Angle::from_signed_dms`] for negative sub-degree values.
    ///
    /// # Errors
    ///
    /// `Validation` if `minutes` is not in [0, 60) or `seconds` is not in [0, 60).
    pub fn from_dms(degrees: i32, minutes: u32, seconds: f64) -> SurveyResult<Self> {
        Self::from_signed_dms(degrees < 0, degrees.unsigned_abs(), minutes, seconds)
    }

    /// Build an angle from an explicit sign and unsigned components.
    pub fn from_signed_dms(
        negative: bool,
        degrees: u32,
        minutes: u32,
        seconds: f64,
    ) -> SurveyResult<Self> {
        if minutes >= 60 {
            return Err(SurveyError::validation(
                "minutes",
                minutes.to_string(),
                "Minutes must be in the range [0, 60)",
            ));
        }
        if !(0.0..60.0).contains(&seconds) {
            return Err(SurveyError::validation(
                "seconds",
                seconds.to_string(),
                "Seconds must be in the range [0, 60)",
            ));
        }

        let magnitude = degrees as f64 + minutes as f64 / 60.0 + seconds / 3600.0;
        Ok(Angle(if negative { -magnitude } else { magnitude }))
    }

    pub fn from_decimal_degrees(decimal_degrees: f64) -> Self {
        Angle(decimal_degrees)
    }

    pub fn from_radians(radians: f64) -> Self {
        Angle(radians.to_degrees())
    }

    /// The canonical signed decimal-degree value.
    pub fn decimal_degrees(&self) -> f64 {
        self.0
    }

    pub fn to_radians(&self) -> f64 {
        self.0.to_radians()
    }

    /// Value in arc-seconds (handy for tolerance checks quoted in ″).
    pub fn arc_seconds(&self) -> f64 {
        self.0 * 3600.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    pub fn abs(self) -> Angle {
        Angle(self.0.abs())
    }

    /// Arithmetic mean of two angles, computed in decimal degrees.
    pub fn mean(a: Angle, b: Angle) -> Angle {
        Angle((a.0 + b.0) / 2.0)
    }

    /// Reduce into [0°, 360°).
    pub fn normalized(self) -> Angle {
        let mut value = self.0.rem_euclid(360.0);
        // rem_euclid rounds tiny negatives up to exactly 360.0
        if value >= 360.0 {
            value -= 360.0;
        }
        Angle(value)
    }

    /// Decompose into degrees, minutes and seconds rounded to 0.1″.
    ///
    /// Rounding is done on the total count of tenths of a second, so a value
    /// like 10°59′59.96″ carries through both boundaries to 11°0′0.0″.
    pub fn to_dms(&self) -> Dms {
        let tenths = (self.0.abs() * TENTHS_PER_DEGREE).round();
        let degrees = (tenths / TENTHS_PER_DEGREE).floor();
        let remainder = tenths - degrees * TENTHS_PER_DEGREE;
        let minutes = (remainder / TENTHS_PER_MINUTE).floor();
        let seconds = (remainder - minutes * TENTHS_PER_MINUTE) / 10.0;

        Dms {
            negative: self.0 < 0.0 && tenths > 0.0,
            degrees: degrees as u32,
            minutes: minutes as u32,
            seconds,
        }
    }

    /// Canonical text form `±D°M′S.S″`. The sign is printed only for values
    /// that are still negative after rounding to 0.1″.
    pub fn format(&self) -> String {
        if !self.0.is_finite() {
            return format!("{}", self.0);
        }
        let dms = self.to_dms();
        format!(
            "{}{}°{}′{:.1}″",
            if dms.negative { "-" } else { "" },
            dms.degrees,
            dms.minutes,
            dms.seconds
        )
    }

    /// Parse angle text. See the module docs for the accepted grammar.
    ///
    /// # Errors
    ///
    /// * `Format` - empty input, non-numeric tokens, or more than three tokens
    /// * `Validation` - minutes or seconds out of range
    pub fn parse(text: &str) -> SurveyResult<Self> {
        let normalized: String = text
            .chars()
            .map(|c| match c {
                '°' | '′' | '″' | '\'' | '"' | ':' => ' ',
                ',' => '.',
                other => other,
            })
            .collect();

        let mut tokens = normalized.split_whitespace();

        let degree_token = tokens
            .next()
            .ok_or_else(|| SurveyError::format(text, "Angle text is empty"))?;
        let degrees: i32 = degree_token
            .parse()
            .map_err(|_| {
                SurveyError::format(text, format!("Degrees '{}' is not an integer", degree_token))
            })?;
        let negative = degree_token.starts_with('-');

        let minutes = match tokens.next() {
            Some(token) => {
                let value: i64 = token
                    .parse()
                    .map_err(|_| {
                        SurveyError::format(text, format!("Minutes '{}' is not an integer", token))
                    })?;
                u32::try_from(value).map_err(|_| {
                    SurveyError::validation(
                        "minutes",
                        value.to_string(),
                        "Minutes must be in the range [0, 60)",
                    )
                })?
            }
            None => 0,
        };

        let seconds = match tokens.next() {
            Some(token) => token
                .parse::<f64>()
                .map_err(|_| {
                    SurveyError::format(text, format!("Seconds '{}' is not a number", token))
                })?,
            None => 0.0,
        };

        if let Some(extra) = tokens.next() {
            return Err(SurveyError::format(text, format!("Unexpected trailing token '{}'", extra)));
        }

        Self::from_signed_dms(negative, degrees.unsigned_abs(), minutes, seconds)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for Angle {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Angle::parse(s)
    }
}

impl Add for Angle {
    type Output = Angle;
    fn add(self, rhs: Angle) -> Angle {
        Angle(self.0 + rhs.0)
    }
}

impl Sub for Angle {
    type Output = Angle;
    fn sub(self, rhs: Angle) -> Angle {
        Angle(self.0 - rhs.0)
    }
}

impl Neg for Angle {
    type Output = Angle;
    fn neg(self) -> Angle {
        Angle(-self.0)
    }
}

impl Mul<f64> for Angle {
    type Output = Angle;
    fn mul(self, rhs: f64) -> Angle {
        Angle(self.0 * rhs)
    }
}

impl Div<f64> for Angle {
    type Output = Angle;
    fn div(self, rhs: f64) -> Angle {
        Angle(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_from_dms_decimal() {
        let a = Angle::from_dms(10, 30, 36.0).unwrap();
        assert_abs_diff_eq!(a.decimal_degrees(), 10.51, epsilon = 1e-12);

        let b = Angle::from_dms(-10, 30, 0.0).unwrap();
        assert_abs_diff_eq!(b.decimal_degrees(), -10.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_degrees_cannot_carry_sign() {
        // Sign lives on the degrees argument; 0 is never negative
        let a = Angle::from_dms(0, 30, 0.0).unwrap();
        assert_abs_diff_eq!(a.decimal_degrees(), 0.5, epsilon = 1e-12);

        let b = Angle::from_signed_dms(true, 0, 30, 0.0).unwrap();
        assert_abs_diff_eq!(b.decimal_degrees(), -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_construction_rejects_out_of_range_components() {
        assert!(matches!(
            Angle::from_dms(10, 60, 0.0),
            Err(SurveyError::Validation { .. })
        ));
        assert!(matches!(
            Angle::from_dms(10, 0, 60.0),
            Err(SurveyError::Validation { .. })
        ));
        assert!(matches!(
            Angle::from_dms(10, 0, -0.1),
            Err(SurveyError::Validation { .. })
        ));
        assert!(Angle::from_dms(10, 0, f64::NAN).is_err());
        assert!(Angle::from_dms(359, 59, 59.99).is_ok());
    }

    #[test]
    fn test_to_dms_carries_rounded_seconds() {
        let a = Angle::from_dms(10, 59, 59.96).unwrap();
        let dms = a.to_dms();
        assert_eq!(dms.degrees, 11);
        assert_eq!(dms.minutes, 0);
        assert_abs_diff_eq!(dms.seconds, 0.0);

        let b = Angle::from_dms(10, 14, 59.97).unwrap();
        let dms = b.to_dms();
        assert_eq!((dms.degrees, dms.minutes), (10, 15));
        assert_abs_diff_eq!(dms.seconds, 0.0);
    }

    #[test]
    fn test_to_dms_negative_sub_degree() {
        let dms = Angle::from_decimal_degrees(-0.5).to_dms();
        assert!(dms.negative);
        assert_eq!(dms.degrees, 0);
        assert_eq!(dms.minutes, 30);
        assert_eq!(dms.signed_degrees(), 0);

        let dms = Angle::from_decimal_degrees(-12.25).to_dms();
        assert_eq!(dms.signed_degrees(), -12);
        assert_eq!(dms.minutes, 15);
    }

    #[test]
    fn test_decimal_roundtrip_within_rounding_tolerance() {
        let seconds_samples = [0.0, 0.04, 0.05, 12.34, 29.99, 45.5, 59.94, 59.95, 59.99];
        for degrees in (-399..400).step_by(7) {
            for minutes in [0u32, 1, 17, 30, 45, 59] {
                for &seconds in &seconds_samples {
                    let original = Angle::from_dms(degrees, minutes, seconds).unwrap();
                    let dms = Angle::from_decimal_degrees(original.decimal_degrees()).to_dms();
                    let rebuilt = Angle::from_signed_dms(
                        dms.negative,
                        dms.degrees,
                        dms.minutes,
                        dms.seconds,
                    )
                    .unwrap();
                    let diff_arcsec = (rebuilt - original).arc_seconds().abs();
                    assert!(
                        diff_arcsec <= 0.05 + 1e-6,
                        "{}°{}′{}″ drifted by {}″",
                        degrees,
                        minutes,
                        seconds,
                        diff_arcsec
                    );
                }
            }
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(Angle::from_dms(123, 45, 6.78).unwrap().format(), "123°45′6.8″");
        assert_eq!(Angle::from_dms(-5, 0, 0.0).unwrap().format(), "-5°0′0.0″");
        assert_eq!(Angle::from_decimal_degrees(-0.5).format(), "-0°30′0.0″");
        assert_eq!(Angle::ZERO.format(), "0°0′0.0″");
        // Rounds to zero, so no sign
        assert_eq!(Angle::from_decimal_degrees(-1e-9).format(), "0°0′0.0″");
        assert_eq!(Angle::from_decimal_degrees(f64::NAN).format(), "NaN");
    }

    #[test]
    fn test_parse_separators() {
        let expected = Angle::from_dms(123, 45, 6.7).unwrap();
        let forms = [
            "123°45′6.7″",
            "123 45 6.7",
            "123:45:6.7",
            "123 45 6,7",
            "123°45'6.7\"",
            "  123  45  6.7  ",
        ];
        for text in forms {
            let parsed = Angle::parse(text).unwrap();
            assert_abs_diff_eq!(
                parsed.decimal_degrees(),
                expected.decimal_degrees(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_parse_optional_components() {
        assert_abs_diff_eq!(Angle::parse("42").unwrap().decimal_degrees(), 42.0);
        assert_abs_diff_eq!(Angle::parse("42 30").unwrap().decimal_degrees(), 42.5);
    }

    #[test]
    fn test_parse_negative_sub_degree() {
        let a = Angle::parse("-0 30 0").unwrap();
        assert_abs_diff_eq!(a.decimal_degrees(), -0.5, epsilon = 1e-12);
        assert_eq!(a.format(), "-0°30′0.0″");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Angle::parse(""), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("   "), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("abc 10 0"), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("12.5"), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("10 x"), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("10 0 0 0"), Err(SurveyError::Format { .. })));
        assert!(matches!(Angle::parse("10 75 0"), Err(SurveyError::Validation { .. })));
        assert!(matches!(Angle::parse("10 -5 0"), Err(SurveyError::Validation { .. })));
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let a = Angle::from_dms(-271, 3, 9.4).unwrap();
        let b: Angle = a.to_string().parse().unwrap();
        assert_abs_diff_eq!(a.arc_seconds(), b.arc_seconds(), epsilon = 1e-6);
    }

    #[test]
    fn test_normalized() {
        assert_abs_diff_eq!(
            Angle::from_decimal_degrees(-335.0).normalized().decimal_degrees(),
            25.0
        );
        assert_abs_diff_eq!(Angle::from_decimal_degrees(725.0).normalized().decimal_degrees(), 5.0);
        assert_abs_diff_eq!(Angle::from_decimal_degrees(360.0).normalized().decimal_degrees(), 0.0);
        let tiny = Angle::from_decimal_degrees(-1e-18).normalized().decimal_degrees();
        assert!((0.0..360.0).contains(&tiny));
    }

    #[test]
    fn test_arithmetic() {
        let a = Angle::from_decimal_degrees(10.0);
        let b = Angle::from_decimal_degrees(4.0);
        assert_eq!((a + b).decimal_degrees(), 14.0);
        assert_eq!((a - b).decimal_degrees(), 6.0);
        assert_eq!((-a).decimal_degrees(), -10.0);
        assert_eq!((a * 0.5).decimal_degrees(), 5.0);
        assert_eq!((a / 4.0).decimal_degrees(), 2.5);
        assert_eq!(Angle::mean(a, b).decimal_degrees(), 7.0);
        assert_abs_diff_eq!(
            Angle::from_radians(std::f64::consts::PI).decimal_degrees(),
            180.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_serializes_as_decimal_degrees() {
        let a = Angle::from_decimal_degrees(-0.25);
        assert_eq!(serde_json::to_string(&a).unwrap(), "-0.25");
        let back: Angle = serde_json::from_str("-0.25").unwrap();
        assert_eq!(back, a);
    }
}
