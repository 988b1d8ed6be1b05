use std::process::ExitCode;

use clap::Parser;

use paintfe_preview::cli::{self, CliArgs};
use paintfe_preview::logger;
use paintfe_preview::settings::RenderSettings;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let saved = RenderSettings::load();
    let settings = args.render_settings(saved.clone());

    // Initialize session log (overwrites previous session log)
    logger::init(settings.log_level, args.verbose);
    log::debug!("render settings: {:?}", settings);

    if args.save_settings {
        // --verbose only lasts for this run
        let updated = RenderSettings {
            log_level: saved.log_level,
            ..settings.clone()
        };
        match updated.validate().and_then(|()| updated.save()) {
            Ok(()) => log::info!("render settings saved"),
            Err(e) => {
                log::error!("could not save render settings: {}", e);
                eprintln!("error: could not save settings: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    cli::run(args, settings)
}
