
use log::{LevelFilter, error, info};

use hlatyper::cli::core::{Commands, get_cli};
use hlatyper::cli::typing::{TypeSettings, check_type_settings};

/// This will run the "type" mode of the tool
/// # Arguments
/// * `settings` - the TypeSettings object
fn run_type(settings: TypeSettings) {
    // get the settings
    let filter_level: LevelFilter = match settings.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };

    // immediately setup logging first
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    // okay, now we can check all the other settings
    let cli_settings: TypeSettings = match check_type_settings(settings) {
        Ok(s) => s,
        Err(e) => {
            error!("Error while processing CLI settings: {e}");
            std::process::exit(exitcode::USAGE);
        }
    };

    // all the work
    match hlatyper::typer::run_typing(&cli_settings) {
        Ok(rows) => {
            info!("Ranked {} result rows.", rows.len());
        },
        Err(e) => {
            error!("Error while typing reads: {e}");
            std::process::exit(exitcode::DATAERR);
        }
    };
}

fn main() {
    let cli = get_cli();
    match cli.command {
        Commands::Type(settings) => {
            run_type(*settings);
        }
    }

    info!("Process finished successfully.");
}
