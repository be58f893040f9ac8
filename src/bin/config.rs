//! Table Log Config CLI
//!
//! View and manage table log configuration.

use clap::{Parser, Subcommand};
use tablelog::config::StoreBackend;
use tablelog::TableLogConfig;

#[derive(Parser)]
#[command(name = "tablelog-config")]
#[command(about = "View and manage table log configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Show {
        /// Config file to load (optional)
        #[arg(short, long)]
        config: Option<String>,

        /// Output as TOML
        #[arg(long)]
        toml: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new config file
    Init {
        /// Output path
        #[arg(short, long, default_value = "tablelog.toml")]
        output: String,
    },

    /// Validate configuration
    Validate {
        /// Config file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Show { config, toml, json } => {
            let cfg = TableLogConfig::load_from(config.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else if toml {
                println!("{}", ::toml::to_string_pretty(&cfg)?);
            } else {
                println!("📋 Table Log Configuration\n");
                println!("Store:");
                match cfg.store.backend {
                    StoreBackend::File => println!("  Backend: file ({:?})", cfg.store_path()),
                    StoreBackend::Memory => println!("  Backend: memory"),
                }

                println!("\nRetention:");
                println!("  Minimum: {}h", cfg.retention.minimum_hours);
                println!("  Check enabled: {}", cfg.retention.check_enabled);

                println!("\nCommit:");
                println!("  Max retries: {}", cfg.commit.max_retries);
                if let Some(client) = &cfg.commit.client_info {
                    println!("  Client: {}", client);
                }

                println!("\nCheckpoint:");
                if cfg.checkpoint.interval == 0 {
                    println!("  Interval: disabled");
                } else {
                    println!("  Interval: every {} versions", cfg.checkpoint.interval);
                }

                println!("\nTable defaults:");
                println!("  Format: {}", cfg.table.default_format);
                println!("  Target file size: {} bytes", cfg.table.target_file_size);
            }
        }

        Commands::Init { output } => {
            let cfg = TableLogConfig::default();
            cfg.save(&output)?;
            println!("✅ Created config file: {}", output);
        }

        Commands::Validate { config } => {
            let checked = TableLogConfig::load_from(config.as_deref())
                .map_err(|e| e.to_string())
                .and_then(|cfg| cfg.validate().map(|_| cfg).map_err(|e| e.to_string()));
            match checked {
                Ok(cfg) => {
                    println!("✅ Configuration is valid");
                    println!("   Store: {:?}", cfg.store_path());
                    println!("   Retention floor: {}h", cfg.retention.minimum_hours);
                }
                Err(e) => {
                    eprintln!("❌ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
