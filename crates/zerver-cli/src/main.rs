mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zerver_common::Dialect;
use zerver_config::ConfigLoader;
use zerver_db::MigrationExecutor;

#[derive(Parser)]
#[command(name = "zerver", version, about = "zerver schema migrations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory holding config.yml / config.toml
    #[arg(long, env = "ZERVER_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// SQLite database file, overriding the configured one
    #[arg(long, env = "ZERVER_DATABASE", global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply or roll back migrations
    Migrate {
        /// App label; every app when omitted
        app: Option<String>,

        /// Migration name (or unique prefix) to migrate to, or `zero`
        target: Option<String>,

        /// Record the migrations without running their SQL
        #[arg(long)]
        fake: bool,

        /// Print the plan instead of running it
        #[arg(long)]
        plan: bool,
    },

    /// List migrations and whether they are applied
    Showmigrations {
        app: Option<String>,

        /// Emit JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Print the SQL statements for a migration
    Sqlmigrate {
        app: String,
        name: String,

        /// Print the SQL to unapply the migration
        #[arg(long)]
        backwards: bool,

        /// SQL dialect (sqlite, postgres)
        #[arg(long)]
        dialect: Option<Dialect>,
    },

    /// Record a migration from earlier releases as applied
    FakePrior { app: String, name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    config_loader.ensure_dirs()?;
    let config = config_loader.load()?;

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = commands::resolve_log_filter(
        rust_log.as_deref(),
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
    );
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config_loader.database_path(&config));
    info!("using database {}", db_path.display());
    let conn = zerver_db::database::open(&db_path)?;
    let mut executor = MigrationExecutor::with_history(conn)?;

    match cli.command {
        Commands::Migrate {
            app,
            target,
            fake,
            plan,
        } => {
            let targets = commands::migration_targets(&executor, app.as_deref(), target.as_deref())?;
            let steps = executor.migration_plan(&targets)?;
            if plan {
                commands::print_plan(&executor, &steps)?;
            } else {
                let executed = executor.migrate(&steps, fake)?;
                if executed.is_empty() {
                    println!("No migrations to apply.");
                }
                for step in executed {
                    println!("  {step}... OK");
                }
            }
        }
        Commands::Showmigrations { app, json } => {
            let statuses = commands::filter_statuses(executor.show_migrations()?, app.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                commands::print_statuses(&statuses);
            }
        }
        Commands::Sqlmigrate {
            app,
            name,
            backwards,
            dialect,
        } => {
            let key = commands::resolve_name(executor.graph(), &app, &name)?;
            let dialect = dialect.unwrap_or(config.database.dialect);
            for statement in executor.sql_for(&key, backwards, dialect)? {
                println!("{statement}");
            }
        }
        Commands::FakePrior { app, name } => {
            let key = zerver_common::MigrationKey::new(app, name);
            executor.record_prior(&key)?;
            println!("Recorded {key} as applied.");
        }
    }

    Ok(())
}
