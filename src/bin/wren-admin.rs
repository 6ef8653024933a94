use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use wren::analytics::retention::purge_fingerprints;
use wren::config::Config;
use wren::storage::{self, StorageError};

#[derive(Parser)]
#[command(name = "wren-admin")]
#[command(about = "Wren site management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a website so its beacons are accepted
    AddSite {
        /// Hostname as it appears in page URLs (e.g. blog.example.com)
        domain: String,
    },
    /// Remove a website together with its recorded visits
    RemoveSite { domain: String },
    /// List registered websites
    ListSites,
    /// Delete seen-visitor fingerprints older than N days
    Purge {
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
        days: u32,
    },
}

/// Hostname form used as the site key: trimmed, lowercase, no scheme or path
fn normalize_domain(raw: &str) -> Result<String> {
    let candidate = raw.trim();
    let candidate = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("https://{candidate}")
    };

    let parsed = url::Url::parse(&candidate)
        .with_context(|| format!("'{}' is not a valid domain", raw.trim()))?;
    parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
        .with_context(|| format!("'{}' has no host", raw.trim()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = storage::connect(&config.database).await?;

    match cli.command {
        Commands::AddSite { domain } => {
            let domain = normalize_domain(&domain)?;
            match storage.register_site(&domain).await {
                Ok(site) => println!("✓ Registered '{}' (id {})", site.domain, site.id),
                Err(StorageError::Conflict) => {
                    println!("⚠ '{}' is already registered", domain)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::RemoveSite { domain } => {
            let domain = normalize_domain(&domain)?;
            if storage.remove_site(&domain).await? {
                println!("✓ Removed '{}' and its visits", domain);
            } else {
                println!("⚠ '{}' was not registered", domain);
            }
        }
        Commands::ListSites => {
            let sites = storage.list_sites().await?;
            if sites.is_empty() {
                println!("No websites registered.");
            } else {
                println!("{:<8} {:<40} {}", "ID", "Domain", "Created");
                println!("{}", "-".repeat(80));
                for site in sites {
                    let created = DateTime::<Utc>::from_timestamp(site.created_at, 0)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| site.created_at.to_string());
                    println!("{:<8} {:<40} {}", site.id, site.domain, created);
                }
            }
        }
        Commands::Purge { days } => {
            // Secrets live in the server process; only stored fingerprints are affected here
            let today = Utc::now().date_naive();
            let purged = purge_fingerprints(storage.as_ref(), today, days).await?;
            println!("✓ Purged {} fingerprint rows older than {} day(s)", purged, days);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" Example.COM ").unwrap(), "example.com");
        assert_eq!(
            normalize_domain("https://blog.example.com/path").unwrap(),
            "blog.example.com"
        );
        assert!(normalize_domain("").is_err());
    }
}
