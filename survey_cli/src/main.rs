//! # Survey Calc CLI
//!
//! Command-line front end for `survey_core`. Reads JSON records, runs one
//! computation and prints a report followed by the JSON result.
//!
//! ```text
//! survey_cli angle <text>
//! survey_cli resection <input.json> [i,j,k i,j,k]
//! survey_cli traverse <journal.json>
//! survey_cli gyro <gyro.json>
//! survey_cli project <file.srv>
//! ```
//!
//! Without arguments it starts an interactive angle converter.
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::io::{self, BufRead, Write};
use std::path::Path;

use serde::Serialize;
use survey_core::angle::Angle;
use survey_core::calculations::gyro::{self, GyroMeasurement, ToleranceCheck};
use survey_core::calculations::resection::{self, Combination, ResectionInput};
use survey_core::calculations::traverse::TheodoliteJournal;
use survey_core::file_io::{self, FileLock};
use survey_core::{GlobalSettings, SurveyError, SurveyResult};

const USAGE: &str = "\
Usage:
  survey_cli angle <text>                         parse and convert an angle
  survey_cli resection <input.json> [i,j,k i,j,k] solve an inverse resection
  survey_cli traverse <journal.json>              reduce a theodolite journal
  survey_cli gyro <gyro.json>                     run the gyro azimuth pipeline
  survey_cli project <file.srv>                   recompute and save a project";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match args.first().map(String::as_str) {
        None => {
            interactive();
            Ok(())
        }
        Some("angle") => arg(&args, 1, "angle text").and_then(run_angle),
        Some("resection") => arg(&args, 1, "input file")
            .and_then(|path| run_resection(Path::new(path), &args[2..])),
        Some("traverse") => {
            arg(&args, 1, "journal file").and_then(|path| run_traverse(Path::new(path)))
        }
        Some("gyro") => arg(&args, 1, "gyro file").and_then(|path| run_gyro(Path::new(path))),
        Some("project") => {
            arg(&args, 1, "project file").and_then(|path| run_project(Path::new(path)))
        }
        Some("help") | Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => Err(SurveyError::validation("command", other, "Unknown command")),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        if let Ok(json) = serde_json::to_string_pretty(&e) {
            eprintln!();
            eprintln!("Error JSON:");
            eprintln!("{}", json);
        }
        let usage_error = matches!(
            e,
            SurveyError::Validation { ref field, .. } if field == "command" || field == "arguments"
        );
        if usage_error {
            eprintln!();
            eprintln!("{}", USAGE);
        }
        std::process::exit(1);
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> SurveyResult<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| {
            SurveyError::validation("arguments", args.join(" "), format!("Missing {}", what))
        })
}

fn print_json<T: Serialize>(value: &T) {
    println!();
    println!("JSON Output:");
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("cannot serialize result: {}", e),
    }
}

fn status_icon(pass: bool) -> &'static str {
    if pass {
        "[OK]"
    } else {
        "[FAIL]"
    }
}

fn print_checks(checks: &[ToleranceCheck]) {
    if checks.is_empty() {
        return;
    }
    println!();
    println!("Tolerance checks:");
    for check in checks {
        println!("  {} {}", status_icon(check.passed), check);
    }
}

fn show(angle: Option<Angle>) -> String {
    angle.map_or_else(|| "-".to_string(), |a| a.format())
}

// ============================================================================
// angle
// ============================================================================

fn run_angle(text: &str) -> SurveyResult<()> {
    let angle = Angle::parse(text)?;
    let dms = angle.to_dms();
    println!("Input:      {}", text);
    println!("Canonical:  {}", angle);
    println!("Decimal:    {:.8}°", angle.decimal_degrees());
    println!("Radians:    {:.10}", angle.to_radians());
    println!("Normalized: {}", angle.normalized());
    println!(
        "Parts:      sign {} / {}° {}′ {:.1}″",
        if dms.negative { "-" } else { "+" },
        dms.degrees,
        dms.minutes,
        dms.seconds
    );
    Ok(())
}

fn interactive() {
    println!("Survey Calc - angle converter");
    println!("=============================");
    println!("{}", USAGE);
    println!();
    println!("Enter an angle (e.g. 45 30 15.5 or -0°30′), empty line to quit.");

    let stdin = io::stdin();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let text = line.trim();
        if text.is_empty() {
            return;
        }
        match Angle::parse(text) {
            Ok(angle) => println!("  {} = {:.8}°", angle, angle.decimal_degrees()),
            Err(e) => println!("  {}", e),
        }
    }
}

// ============================================================================
// resection
// ============================================================================

fn parse_combination(text: &str) -> SurveyResult<Combination> {
    let invalid =
        || SurveyError::validation("combination", text, "Expected three indices like 0,1,2");
    let indices = text
        .split(',')
        .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
        .collect::<SurveyResult<Vec<usize>>>()?;
    <Combination>::try_from(indices.as_slice()).map_err(|_| invalid())
}

fn run_resection(path: &Path, rest: &[String]) -> SurveyResult<()> {
    let input: ResectionInput = file_io::read_json(path)?;
    input.validate()?;

    let (first, second) = match rest {
        [] => resection::default_combinations(input.points.len())?,
        [a, b] => (parse_combination(a)?, parse_combination(b)?),
        _ => {
            return Err(SurveyError::validation(
                "arguments",
                rest.join(" "),
                "Give either no combinations or exactly two",
            ))
        }
    };

    let result = resection::calculate(&input, first, second)?;

    println!("═══════════════════════════════════════");
    println!("  INVERSE RESECTION");
    println!("═══════════════════════════════════════");
    println!();
    println!("Directional angles:");
    for angle in &result.directional_angles {
        println!("  {:<8} {}", angle.point_name, angle.angle());
    }
    println!();
    for (label, candidate) in [("Estimate 1", &result.first), ("Estimate 2", &result.second)] {
        println!(
            "{} {:?} ({}): x = {:.3}  y = {:.3}",
            label,
            candidate.combination,
            candidate.point_names.join(", "),
            candidate.point.x,
            candidate.point.y
        );
    }
    println!();
    println!(
        "Discrepancy: {:.2} cm (limit {:.2} cm) {}",
        result.discrepancy_cm,
        result.max_discrepancy_cm,
        status_icon(result.within_tolerance())
    );
    match result.final_point {
        Some(p) => println!("Station:     x = {:.3}  y = {:.3}", p.x, p.y),
        None => println!("Station:     not accepted (exceeds tolerance)"),
    }
    if result.inside_danger_circle {
        println!("Warning:     station lies inside the danger circle of the first combination");
    }

    print_json(&result);
    Ok(())
}

// ============================================================================
// traverse
// ============================================================================

fn run_traverse(path: &Path) -> SurveyResult<()> {
    let mut journal: TheodoliteJournal = file_io::read_json(path)?;
    let settings = GlobalSettings::default();
    let reduced = journal.reduce_all();

    println!(
        "Journal: {} ({} of {} stations reduced)",
        journal.name,
        reduced,
        journal.stations.len()
    );
    println!();
    println!(
        "{:>4} {:>5} {:>5} {:>14} {:>14} {:>14} {:>10}",
        "St", "From", "To", "Left", "Right", "Mean", "Horiz (m)"
    );
    for s in &journal.stations {
        println!(
            "{:>4} {:>5} {:>5} {:>14} {:>14} {:>14} {:>10}",
            s.station_number,
            s.point1,
            s.point2,
            show(s.left_diff()),
            show(s.right_diff()),
            show(s.average_angle()),
            s.horizontal_distance().map_or_else(|| "-".to_string(), |d| format!("{:.3}", d))
        );
    }

    let checks = journal.face_checks(settings.allowable_circle_difference_min);
    if !checks.is_empty() {
        println!();
        println!("Face checks (limit {}′):", settings.allowable_circle_difference_min);
        for check in &checks {
            println!(
                "  {} station {}: {}",
                status_icon(check.passed),
                check.station_number,
                check.difference
            );
        }
    }

    print_json(&journal);
    Ok(())
}

// ============================================================================
// gyro
// ============================================================================

fn run_gyro(path: &Path) -> SurveyResult<()> {
    let mut measurement: GyroMeasurement = file_io::read_json(path)?;
    let settings = GlobalSettings::default();
    let outcome = gyro::calculate_all(&mut measurement, &settings.gyro_tolerances);

    let tz = &measurement.torsion_zero;
    let eq = &measurement.equilibrium;
    let br = &measurement.bearing;
    let tc = &measurement.torsion_correction;
    let number = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));

    println!("Gyro measurement: {}", measurement.name);
    println!();
    println!(
        "Torsion zero:   n0' = {}  n0'' = {}  n0 = {}",
        number(tz.n0_prime),
        number(tz.n0_double_prime),
        number(tz.n0)
    );
    println!(
        "Equilibrium:    N0' = {}  N0'' = {}  N0 = {}",
        show(eq.n0_prime),
        show(eq.n0_double_prime),
        show(eq.n0)
    );
    println!(
        "Bearing:        N' = {}  N'' = {}  N = {}",
        show(br.n_prime),
        show(br.n_double_prime),
        show(br.n)
    );
    println!(
        "Torsion corr.:  Nk = {}  psi_t = {}  psi_k = {}  epsilon = {}",
        show(tc.nk_mean),
        show(tc.psi_t),
        show(tc.psi_k),
        show(tc.epsilon)
    );
    println!("Azimuth:        {}", show(measurement.azimuth));

    let checks = outcome?;
    print_checks(&checks);
    print_json(&measurement);
    Ok(())
}

// ============================================================================
// project
// ============================================================================

fn run_project(path: &Path) -> SurveyResult<()> {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "survey_cli".to_string());
    let lock = FileLock::acquire(path, user)?;

    let mut project = file_io::load_project(path)?;
    let report = project.recompute_all();

    println!("Project {} - {} ({})", project.meta.job_id, project.meta.site, project.meta.surveyor);
    println!();
    for item in project.items() {
        println!(
            "  {:<10} #{:<4} {}",
            item.calc_type(),
            item.id().map_or_else(|| "-".to_string(), |id| id.to_string()),
            item.label()
        );
    }
    println!();
    println!(
        "Recomputed {} record(s), {} tolerance check(s) failed",
        report.updated, report.tolerance_failures
    );
    for (name, e) in &report.errors {
        println!("  {} {}: {}", status_icon(false), name, e);
    }

    file_io::save_project(&project, path)?;
    drop(lock);
    Ok(())
}
