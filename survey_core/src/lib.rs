//! # survey_core - Survey Computation Engine
//!
//! `survey_core` does the numerical work behind a mine/field surveying
//! workbook: inverse resection, theodolite traverse reduction and the
//! gyroscopic azimuth pipeline. Every record, result and error is
//! JSON-serializable so it can be stored in a project file or handed to
//! another tool.
//!
//! ## Design Philosophy
//!
//! - **Decimal-degree canonical angles**: sexagesimal text only at the edges
//! - **Plain records**: computations take and return data, no UI handles
//! - **Rich Errors**: structured error types, not just strings
//! - **Advisory tolerances**: checks flag results, they never block them
//!
//! ## Quick Start
//!
//! ```rust
//! use survey_core::angle::Angle;
//!
//! let a: Angle = "10°30′15″".parse().unwrap();
//! let b = Angle::from_decimal_degrees(-0.5);
//! assert_eq!((a + b).format(), "10°0′15.0″");
//! assert_eq!(b.format(), "-0°30′0.0″");
//! ```
//!
//! ## Modules
//!
//! - [`angle`] - Sexagesimal angle value type
//! - [`calculations`] - Resection, traverse and gyro computations
//! - [`project`] - Project container, metadata, and settings
//! - [`errors`] - Structured error types
//! - [`file_io`] - File operations with atomic saves and locking

pub mod angle;
pub mod calculations;
pub mod errors;
pub mod file_io;
pub mod project;

// Re-export commonly used types at crate root for convenience
pub use angle::Angle;
pub use errors::{SurveyError, SurveyResult};
pub use file_io::{load_project, save_project, FileLock};
pub use project::{GlobalSettings, Project, ProjectMetadata};
