use crate::settings::Settings;
use crate::template_matching::Region;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Run,
    List,
}

/// Flags given on the command line. Unset options leave the settings alone.
#[derive(Debug, Default, PartialEq)]
pub struct Args {
    pub list: bool,
    pub debug_mode: bool,
    pub timeout_secs: Option<u64>,
    pub driver: Option<PathBuf>,
    pub capture_dir: Option<PathBuf>,
    pub templates: Option<PathBuf>,
    pub interval_secs: Option<f64>,
    pub devices: Option<Vec<u32>>,
    pub order: Option<Vec<String>>,
    pub threshold: Option<f32>,
    /// `Some(None)` clears the search region.
    pub region: Option<Option<Region>>,
    pub tap_y: Option<u32>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
pub enum Parsed {
    Help,
    Version,
    Run(Args),
}

impl Args {
    /// Parse the process arguments. Prints help, version or the error and
    /// returns None when there is nothing to run.
    pub fn parse() -> Option<Self> {
        match Self::parse_from(env::args().skip(1)) {
            Ok(Parsed::Run(args)) => Some(args),
            Ok(Parsed::Help) => {
                print_help();
                None
            }
            Ok(Parsed::Version) => {
                println!(
                    "LD Trace v{} ({})",
                    env!("LDTRACE_VERSION_DISPLAY"),
                    env!("LDTRACE_BUILD_YEAR")
                );
                None
            }
            Err(msg) => {
                eprintln!("❌ {}", msg);
                print_help();
                None
            }
        }
    }

    pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Parsed, String> {
        let mut parsed = Args::default();

        for arg in args {
            if arg == "--help" || arg == "-h" {
                return Ok(Parsed::Help);
            } else if arg == "--version" || arg == "-v" {
                return Ok(Parsed::Version);
            } else if arg == "--debug" {
                parsed.debug_mode = true;
            } else if arg == "--list" || arg == "-l" {
                parsed.list = true;
            } else if let Some(val) = arg.strip_prefix("--timeout=") {
                parsed.timeout_secs = Some(number(val, "timeout")?);
            } else if let Some(val) = arg.strip_prefix("--driver=") {
                parsed.driver = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--capture-dir=") {
                parsed.capture_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--templates=") {
                parsed.templates = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--interval=") {
                parsed.interval_secs = Some(number(val, "interval")?);
            } else if let Some(val) = arg.strip_prefix("--devices=") {
                let devices = split_list(val)
                    .map(|d| number(d, "device index"))
                    .collect::<Result<Vec<u32>, _>>()?;
                parsed.devices = Some(devices);
            } else if let Some(val) = arg.strip_prefix("--order=") {
                parsed.order = Some(split_list(val).map(str::to_string).collect());
            } else if let Some(val) = arg.strip_prefix("--threshold=") {
                parsed.threshold = Some(number(val, "threshold")?);
            } else if let Some(val) = arg.strip_prefix("--region=") {
                parsed.region = Some(if val.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(
                        Region::parse(val)
                            .ok_or_else(|| format!("Invalid region '{}', expected x,y,w,h", val))?,
                    )
                });
            } else if let Some(val) = arg.strip_prefix("--tap-y=") {
                parsed.tap_y = Some(number(val, "tap row")?);
            } else if let Some(val) = arg.strip_prefix("--log-file=") {
                parsed.log_file = Some(PathBuf::from(val));
            } else {
                return Err(format!("Unknown argument: {}", arg));
            }
        }

        Ok(Parsed::Run(parsed))
    }

    pub fn mode(&self) -> Mode {
        if self.list { Mode::List } else { Mode::Run }
    }

    /// Command-line values win over everything else.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.driver {
            settings.driver_path = Some(path.clone());
        }
        if let Some(path) = &self.capture_dir {
            settings.capture_dir = Some(path.clone());
        }
        if let Some(path) = &self.templates {
            settings.template_dir = path.clone();
        }
        if let Some(secs) = self.interval_secs {
            settings.interval_secs = secs;
        }
        if let Some(devices) = &self.devices {
            settings.selected_devices = devices.clone();
        }
        if let Some(order) = &self.order {
            settings.template_order = order.clone();
        }
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if let Some(region) = self.region {
            settings.search_region = region;
        }
        if let Some(y) = self.tap_y {
            settings.tap_y = y;
        }
        if let Some(path) = &self.log_file {
            settings.log_file = Some(path.clone());
        }
        settings.debug |= self.debug_mode;
    }
}

fn number<T: std::str::FromStr>(val: &str, what: &str) -> Result<T, String> {
    val.trim()
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", what, val))
}

fn split_list(val: &str) -> impl Iterator<Item = &str> {
    val.split([',', '|']).map(str::trim).filter(|s| !s.is_empty())
}

fn print_help() {
    println!("🤖 LD Trace - LDPlayer image tap automation");
    println!();
    println!("USAGE:");
    println!("    ldtrace [FLAGS]");
    println!();
    println!("FLAGS:");
    println!("    (no flags)            Run on running emulators with templates from ./trace");
    println!("    --list, -l            List emulators and exit");
    println!("    --driver=PATH         Path to ld.exe (env LDTRACE_DRIVER)");
    println!("    --capture-dir=PATH    Emulator shared picture folder (env LDTRACE_CAPTURE_DIR)");
    println!("    --templates=PATH      Template image folder (env LDTRACE_TEMPLATE_DIR)");
    println!("    --interval=SECS       Pause between cycles, 0.1 to 60 (default 1.0)");
    println!("    --devices=1,2         Also select these emulators when not running");
    println!("    --order=a.png,b.png   Template priority, unlisted ones follow sorted");
    println!("    --threshold=F         Match threshold (default 0.9)");
    println!("    --region=X,Y,W,H|none Search region (default 180,120,430,60)");
    println!("    --tap-y=N             Tap row for matches (default 320)");
    println!("    --debug               Enable debug logging");
    println!("    --log-file=PATH       Write the log to a file instead of stderr");
    println!("    --timeout=N           Stop after N seconds");
    println!("    --help, -h            Show this help message");
    println!("    --version, -v         Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    ldtrace --list");
    println!(r"    ldtrace --driver=D:\LDPlayer\LDPlayer9\ld.exe --templates=trace");
    println!("    ldtrace --devices=0,3 --interval=2.5 --debug");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Parsed, String> {
        Args::parse_from(args.iter().map(|s| s.to_string()))
    }

    fn run_args(args: &[&str]) -> Args {
        match parse(args) {
            Ok(Parsed::Run(args)) => args,
            other => panic!("expected run args, got {other:?}"),
        }
    }

    #[test]
    fn test_no_flags_runs_with_defaults() {
        let args = run_args(&[]);
        assert_eq!(args, Args::default());
        assert_eq!(args.mode(), Mode::Run);
    }

    #[test]
    fn test_help_and_version_short_circuit() {
        assert_eq!(parse(&["--debug", "--help"]), Ok(Parsed::Help));
        assert_eq!(parse(&["-v"]), Ok(Parsed::Version));
    }

    #[test]
    fn test_values_are_parsed() {
        let args = run_args(&[
            "--devices=0, 3|5",
            "--order=b.png,a.png",
            "--interval=2.5",
            "--region=1,2,3,4",
            "--tap-y=300",
            "--timeout=10",
            "--list",
        ]);
        assert_eq!(args.devices, Some(vec![0, 3, 5]));
        assert_eq!(args.order, Some(vec!["b.png".to_string(), "a.png".to_string()]));
        assert_eq!(args.interval_secs, Some(2.5));
        assert_eq!(args.region, Some(Some(Region::new(1, 2, 3, 4))));
        assert_eq!(args.tap_y, Some(300));
        assert_eq!(args.timeout_secs, Some(10));
        assert_eq!(args.mode(), Mode::List);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(parse(&["--timeout=soon"]).is_err());
        assert!(parse(&["--devices=1,x"]).is_err());
        assert!(parse(&["--region=1,2,3"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn test_apply_overrides_settings() {
        let mut settings = Settings::default();
        run_args(&["--region=none", "--threshold=0.8", "--debug", "--templates=imgs"])
            .apply(&mut settings);
        assert_eq!(settings.search_region, None);
        assert_eq!(settings.threshold, 0.8);
        assert!(settings.debug);
        assert_eq!(settings.template_dir, PathBuf::from("imgs"));
    }
}
