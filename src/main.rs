use clap::{Parser, Subcommand};

use nimbus::{app, config::AppConfig, db, schema, state::AppState};

#[derive(Parser)]
#[command(name = "nimbus", about = "EC2 onboarding portal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create or upgrade the user store, then exit.
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    app::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitDb => {
            let pool = db::connect(&config.database_path).await?;
            let report = schema::init_store(&pool).await?;
            if report.is_noop() {
                tracing::info!(table = %report.table, "database already up to date");
            } else {
                tracing::info!(table = %report.table, added = ?report.added, "database initialised");
            }
            pool.close().await;
        }
        Command::Serve => {
            let state = AppState::init(config).await?;
            app::serve(app::build_app(state)).await?;
        }
    }

    Ok(())
}
