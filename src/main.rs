// src/main.rs
//
// Headless command line front end: run the serial link, inspect ports,
// print recent readings, write a default settings file, manage the
// database password in the keyring.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use echoplant_lib::io::notification_channel;
use echoplant_lib::io::serial::{
    LinkCollaborators, PortCatalog, ScoreContext, SerialLinkManager, SerialPortBackend,
    SignatureScorer,
};
use echoplant_lib::readings::{assess_reading, recent_readings};
use echoplant_lib::settings::{self, AppSettings};

/// EchoPlant sensor link
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the sensor and store records until Ctrl-C
    Run,
    /// List serial ports, best candidate first
    Ports,
    /// Print the latest stored readings with assessments
    Readings {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Write a settings file with default values
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Read the PostgreSQL password from stdin into the system keyring
    SetDbPassword,
    /// Remove the PostgreSQL password from the system keyring
    ClearDbPassword,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), String> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::InitConfig { force } => return init_config(config, force),
        Commands::SetDbPassword => return set_db_password(),
        Commands::ClearDbPassword => {
            echoplant_lib::clear_postgres_password()?;
            println!("Removed PostgreSQL password from keyring");
            return Ok(());
        }
        _ => {}
    }

    let settings = match config {
        Some(path) => settings::load_settings_from(path)?,
        None => settings::load_settings()?,
    };
    match cli.command {
        Commands::Run => run(settings).await,
        Commands::Ports => ports(&settings),
        Commands::Readings { limit } => readings(&settings, limit).await,
        Commands::InitConfig { .. } | Commands::SetDbPassword | Commands::ClearDbPassword => {
            Ok(())
        }
    }
}

fn init_config(config: Option<&Path>, force: bool) -> Result<(), String> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => settings::settings_path()?,
    };
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    match config {
        Some(path) => settings::save_settings_to(path, &AppSettings::default())?,
        None => settings::save_settings(&AppSettings::default())?,
    }
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

fn set_db_password() -> Result<(), String> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| format!("Failed to read password: {}", e))?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err("Password is empty".to_string());
    }
    echoplant_lib::store_postgres_password(password)?;
    println!("Stored; set storage.postgres_password_from_keyring = true to use it");
    Ok(())
}

async fn run(settings: AppSettings) -> Result<(), String> {
    if settings.logging.file_logging {
        echoplant_lib::init_file_logging(Path::new(&settings.logging.reports_dir))?;
    }

    let store = echoplant_lib::open_store(&settings.storage).await?;
    let cipher = echoplant_lib::field_cipher(
        &settings.crypto,
        !settings.serial.fields_to_encrypt.is_empty(),
    )?;

    let (notifier, mut notifications) = notification_channel();
    let parts = LinkCollaborators::new(&settings.serial, store, notifier, cipher);
    let manager = SerialLinkManager::new(settings.serial, parts);
    manager.connect().map_err(|e| e.to_string())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = notifications.recv() => match next {
                Some(notification) => match serde_json::to_string(&notification) {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("Failed to serialize notification: {}", e),
                },
                None => break,
            },
        }
    }

    manager.close().await.map_err(|e| e.to_string())?;
    echoplant_lib::stop_file_logging();
    Ok(())
}

fn ports(settings: &AppSettings) -> Result<(), String> {
    let catalog = PortCatalog::new(Arc::new(SignatureScorer::new(
        settings.serial.device_signatures.clone(),
    )));
    let previously_used = HashSet::new();
    let ctx = ScoreContext {
        active: None,
        previously_used: &previously_used,
    };
    let candidates = catalog.scan(&SerialPortBackend, &ctx)?;
    if candidates.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for candidate in candidates {
        let info = &candidate.info;
        let ids = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "-".to_string(),
        };
        println!(
            "{:>4}  {:<24} {:<6} {:<10} {}",
            candidate.score,
            candidate.path,
            info.port_type,
            ids,
            info.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn readings(settings: &AppSettings, limit: usize) -> Result<(), String> {
    let store = echoplant_lib::open_store(&settings.storage).await?;
    let cipher = echoplant_lib::field_cipher(
        &settings.crypto,
        !settings.serial.fields_to_encrypt.is_empty(),
    )?;
    let readings = recent_readings(
        store.as_ref(),
        &settings.serial.target_table,
        limit,
        cipher.as_deref(),
    )
    .await
    .map_err(|e| e.to_string())?;

    if readings.is_empty() {
        println!("No readings in {}", settings.serial.target_table);
        return Ok(());
    }
    for reading in &readings {
        println!("#{} {}", reading.id, reading.reading_date.to_rfc3339());
        for assessment in assess_reading(reading) {
            println!(
                "    {:<12} {:>6.1} {:<3} {:<12} {}",
                format!("{:?}", assessment.metric).to_lowercase(),
                assessment.value,
                assessment.metric.unit(),
                assessment.status,
                assessment.recommendation
            );
        }
    }
    Ok(())
}
