use clap::Parser;
use thisvid_ripper::commands::{Cli, Commands};
use thisvid_ripper::utils::dependency_check;
use thisvid_ripper::{Config, Error, Result};

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load();

    // Commands that never spawn yt-dlp skip the dependency check
    let needs_ytdlp = matches!(
        cli.command,
        None | Some(Commands::Interactive) | Some(Commands::Run(_)) | Some(Commands::Resume { .. })
    );
    if needs_ytdlp {
        let status = dependency_check::check_dependencies(&config).await;
        if !dependency_check::minimum_dependencies_available(&status) {
            dependency_check::print_dependency_status(&status);
            return Err(Error::MissingDependency(format!(
                "{} was not found or could not be run",
                config.ytdlp_command()
            )));
        }
        if !status.ffmpeg_available {
            log::warn!("ffmpeg not found; some videos may download without merged audio");
        }
    }

    match cli.command {
        None | Some(Commands::Interactive) => thisvid_ripper::commands::interactive_command(config).await,
        Some(Commands::Run(args)) => thisvid_ripper::commands::run_command(args, config).await,
        Some(Commands::Resume { dir, yes }) => thisvid_ripper::commands::resume_command(&dir, yes, config).await,
        Some(Commands::Status { dir }) => thisvid_ripper::commands::status_command(&dir).await,
        Some(Commands::Config { action }) => thisvid_ripper::commands::config_command(action).await,
        Some(Commands::CheckUpdate) => thisvid_ripper::commands::update_command(&config).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
