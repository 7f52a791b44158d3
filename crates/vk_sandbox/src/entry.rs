//! Program entry harness
//!
//! Parses the command line, loads configuration, initialises logging and runs
//! a program body. Any error is logged and the process aborts: probes never
//! recover from an unexpected status.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{Config, ConfigError, SandboxConfig};
use crate::foundation::logging;
use crate::sample::{Sample, SampleApplication};
use crate::vulkan::VulkanResult;

/// Failure before the program body runs
#[derive(Error, Debug)]
pub enum EntryError {
    /// Command line could not be parsed (includes `--help`)
    #[error(transparent)]
    Args(#[from] clap::Error),

    /// Configuration file missing, malformed or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// What a program body gets from the harness
#[derive(Debug, Clone)]
pub struct EntryData {
    /// Effective configuration after command line overrides
    pub config: SandboxConfig,
}

/// Command line accepted by every program
pub fn command(name: &'static str) -> Command {
    Command::new(name)
        .about("Vulkan sandbox program")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Load settings from a .toml or .ron file"),
        )
        .arg(
            Arg::new("frames")
                .short('f')
                .long("frames")
                .value_name("N")
                .value_parser(value_parser!(u64).range(1..))
                .help("Stop after rendering N frames"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32).range(1..))
                .help("Window width"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32).range(1..))
                .help("Window height"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("error, warn, info, debug or trace"),
        )
        .arg(
            Arg::new("validation")
                .long("validation")
                .help("Enable validation layers")
                .action(ArgAction::SetTrue)
                .conflicts_with("no-validation"),
        )
        .arg(
            Arg::new("no-validation")
                .long("no-validation")
                .help("Disable validation layers")
                .action(ArgAction::SetTrue),
        )
}

fn config_from_matches(name: &str, matches: &ArgMatches) -> Result<SandboxConfig, EntryError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SandboxConfig::load_from_file(path)?,
        None => SandboxConfig::default().with_application_name(name),
    };

    if let Some(&frames) = matches.get_one::<u64>("frames") {
        config.frame_limit = Some(frames);
    }
    if let Some(&width) = matches.get_one::<u32>("width") {
        config.window.width = width;
    }
    if let Some(&height) = matches.get_one::<u32>("height") {
        config.window.height = height;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level.clone_from(level);
    }
    if matches.get_flag("validation") {
        config.enable_validation = Some(true);
    } else if matches.get_flag("no-validation") {
        config.enable_validation = Some(false);
    }

    config.validate()?;
    Ok(config)
}

/// Build the effective configuration from an argument list
pub fn parse_config<I, T>(name: &'static str, args: I) -> Result<SandboxConfig, EntryError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command(name).try_get_matches_from(args)?;
    config_from_matches(name, &matches)
}

/// Run `body` as program `name`
///
/// Logs "Application Startup" before and "Application Shutdown" after the
/// body. Every resource the body creates is dropped before shutdown is
/// logged. On error the failure is logged and the process aborts.
pub fn run<F>(name: &'static str, body: F)
where
    F: FnOnce(&EntryData) -> VulkanResult<()>,
{
    let config = match parse_config(name, std::env::args_os()) {
        Ok(config) => config,
        Err(EntryError::Args(err)) => err.exit(),
        Err(err) => {
            logging::init(log::LevelFilter::Info);
            log::error!("{err}");
            std::process::abort();
        }
    };

    logging::init(config.log_filter().unwrap_or(log::LevelFilter::Info));
    log::info!("Application Startup");
    log::debug!("Configuration: {config:?}");

    let entry = EntryData { config };
    if let Err(err) = body(&entry) {
        log::error!("{err}");
        std::process::abort();
    }

    log::info!("Application Shutdown");
}

/// Run a windowed [`Sample`] until its window closes or the frame limit is hit
pub fn run_sample<S: Sample>(name: &'static str) {
    run(name, |entry| {
        let mut app = SampleApplication::<S>::new(&entry.config)?;
        app.run()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_program_name() {
        let config = parse_config("memory_commitment", ["memory_commitment"]).unwrap();
        assert_eq!(config.application_name, "memory_commitment");
        assert_eq!(config.frame_limit, None);
        assert_eq!(config.enable_validation, None);
    }

    #[test]
    fn test_flags_override_config() {
        let config = parse_config(
            "render_3d_image",
            [
                "render_3d_image",
                "--frames",
                "10",
                "--width",
                "640",
                "--height",
                "480",
                "--log-level",
                "debug",
                "--no-validation",
            ],
        )
        .unwrap();

        assert_eq!(config.frame_limit, Some(10));
        assert_eq!((config.window.width, config.window.height), (640, 480));
        assert_eq!(config.log_filter().unwrap(), log::LevelFilter::Debug);
        assert_eq!(config.enable_validation, Some(false));
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        assert!(matches!(
            parse_config("probe", ["probe", "--frames", "0"]),
            Err(EntryError::Args(_))
        ));
        assert!(matches!(
            parse_config("probe", ["probe", "--validation", "--no-validation"]),
            Err(EntryError::Args(_))
        ));
        assert!(matches!(
            parse_config("probe", ["probe", "--log-level", "chatty"]),
            Err(EntryError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_config_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("vk_sandbox_entry_{}.ron", std::process::id()));
        std::fs::write(&path, "(application_name: \"from_file\", frame_limit: Some(3))").unwrap();

        let config = parse_config(
            "probe",
            [OsString::from("probe"), OsString::from("--config"), path.clone().into_os_string()],
        );
        std::fs::remove_file(&path).ok();

        let config = config.unwrap();
        assert_eq!(config.application_name, "from_file");
        assert_eq!(config.frame_limit, Some(3));
    }

    #[test]
    fn test_command_definition_is_consistent() {
        command("probe").debug_assert();
    }
}
