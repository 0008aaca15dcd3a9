use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gitdir::config::{LogFormat, ServerConfig};

#[derive(Parser)]
#[command(name = "gitdir")]
#[command(about = "A self-hosted git SSH server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SSH server (the default).
    Serve,

    /// Invoked by the hook scripts installed into managed repos.
    #[command(hide = true)]
    Hook {
        name: String,

        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn init_logging(settings: &ServerConfig) -> anyhow::Result<()> {
    let level = if settings.debug { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env().add_directive(format!("gitdir={level}").parse()?);

    match settings.log_format {
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerConfig::from_env()?;

    init_logging(&settings)?;

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => gitdir::server::serve(settings).await?,
        Commands::Hook { name, args } => {
            if let Err(err) = gitdir::hook::run(&settings, &name, &args) {
                // This message is what the pushing client sees from git.
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
