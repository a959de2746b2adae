use std::path::PathBuf;

use clap::Parser;

use crate::error::{ReportError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "biofuel_report",
    about = "Build the B100 and ethanol dispatch report from a SICOM export and municipality boundaries."
)]
pub struct Args {
    /// Dispatch records CSV
    #[arg(long = "dispatches", default_value = "dispatches.csv")]
    pub dispatches: PathBuf,
    /// Municipality boundaries GeoJSON
    #[arg(long = "municipalities", default_value = "municipalities.geojson")]
    pub municipalities: PathBuf,
    /// Directory for the report, maps and exported tables
    #[arg(long = "out-dir", default_value = "report")]
    pub out_dir: PathBuf,
    /// Rows shown per table in the console preview
    #[arg(long = "preview-rows", default_value_t = 3)]
    pub preview_rows: usize,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub dispatches: PathBuf,
    pub municipalities: PathBuf,
    pub out_dir: PathBuf,
    pub preview_rows: usize,
}

impl ReportConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        for (what, path) in [
            ("dispatch file", &args.dispatches),
            ("municipality file", &args.municipalities),
        ] {
            if !path.is_file() {
                return Err(ReportError::Config(format!(
                    "{} not found: {}",
                    what,
                    path.display()
                )));
            }
        }
        if args.out_dir.exists() && !args.out_dir.is_dir() {
            return Err(ReportError::Config(format!(
                "output path is not a directory: {}",
                args.out_dir.display()
            )));
        }
        Ok(ReportConfig {
            dispatches: args.dispatches,
            municipalities: args.municipalities,
            out_dir: args.out_dir,
            preview_rows: args.preview_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn defaults_parse() {
        let args = Args::parse_from(["biofuel_report"]);
        assert_eq!(args.dispatches, PathBuf::from("dispatches.csv"));
        assert_eq!(args.out_dir, PathBuf::from("report"));
        assert_eq!(args.preview_rows, 3);
    }

    #[test]
    fn missing_input_is_rejected() {
        let args = Args::parse_from([
            "biofuel_report",
            "--dispatches",
            "/nonexistent/d.csv",
        ]);
        let err = ReportConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ReportError::Config(ref m) if m.contains("dispatch file")));
    }

    #[test]
    fn file_as_out_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("d.csv");
        let geo = dir.path().join("m.geojson");
        std::fs::write(&csv, "").unwrap();
        std::fs::write(&geo, "").unwrap();
        let args = Args::parse_from(vec![
            OsString::from("biofuel_report"),
            OsString::from("--dispatches"),
            csv.clone().into_os_string(),
            OsString::from("--municipalities"),
            geo.into_os_string(),
            OsString::from("--out-dir"),
            csv.into_os_string(),
        ]);
        assert!(matches!(
            ReportConfig::from_args(args),
            Err(ReportError::Config(_))
        ));
    }
}
