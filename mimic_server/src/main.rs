use clap::Parser;
use mimic_server::auth::generate_api_key;
use mimic_server::cli::{Cli, Commands};
use mimic_server::server::AppState;
use mimic_server::services::ServiceRegistry;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mimic_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    let cmd = cli.command.unwrap_or(Commands::Serve {
        host: "0.0.0.0".to_string(),
        port: 8000,
    });

    match cmd {
        Commands::Serve { host, port } => {
            let cfg = mimic_core::config::MimicConfig::from_env()?;
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            // Fake services register here; the core ships none of its own.
            let services = ServiceRegistry::new();
            let state = AppState::from_config(&cfg, services).await?;
            state.platform.migrate().await?;
            mimic_server::server::serve(addr, state).await?;
        }
        Commands::Migrate { database_url } => {
            let url = database_url
                .or_else(|| std::env::var("MIMIC_DATABASE_URL").ok())
                .or_else(|| std::env::var("DATABASE_URL").ok());
            let Some(url) = url else {
                anyhow::bail!("no database configured; set MIMIC_DATABASE_URL");
            };
            let pool = sqlx::PgPool::connect(&url).await?;
            mimic_core::PlatformDb::new(pool).migrate().await?;
            tracing::info!("platform migrations applied");
        }
        Commands::CreateApiKey {
            owner,
            expires_in_days,
        } => {
            let cfg = mimic_core::config::MimicConfig::from_env()?;
            let store = mimic_core::Store::connect(&cfg.postgres).await?;
            let platform = mimic_core::PlatformDb::new(store.pool().clone());
            platform.migrate().await?;

            let expires_at = expires_in_days
                .map(|days| chrono::Utc::now() + chrono::Duration::days(days as i64));
            let (record, token) = generate_api_key(&owner, expires_at);
            platform.insert_api_key(&record).await?;

            // The secret is not stored; this is the only time it prints.
            println!("{token}");
        }
        Commands::Config => {
            fn redact(s: &str) -> String {
                if s.len() <= 8 {
                    return "***".to_string();
                }
                format!("{}***{}", &s[..4], &s[s.len() - 4..])
            }

            let cfg = serde_json::json!({
                "MIMIC_DATABASE_URL": std::env::var("MIMIC_DATABASE_URL").ok().map(|v| redact(&v)),
                "DATABASE_URL": std::env::var("DATABASE_URL").ok().map(|v| redact(&v)),
                "MIMIC_TOKEN_SECRET": std::env::var("MIMIC_TOKEN_SECRET").ok().map(|_| "<set>".to_string()),
                "MIMIC_TOKEN_AUDIENCE": std::env::var("MIMIC_TOKEN_AUDIENCE").ok(),
                "MIMIC_DEFAULT_TTL_SECONDS": std::env::var("MIMIC_DEFAULT_TTL_SECONDS").ok(),
                "MIMIC_REAPER_INTERVAL_MS": std::env::var("MIMIC_REAPER_INTERVAL_MS").ok(),
            });
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Commands::Check => {
            let url = std::env::var("MIMIC_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .ok();
            if let Some(url) = url {
                match sqlx::PgPool::connect(&url).await {
                    Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                        Ok(_) => println!("postgres: ok"),
                        Err(e) => println!("postgres: error ({e})"),
                    },
                    Err(e) => println!("postgres: error ({e})"),
                }
            } else {
                println!("postgres: not configured");
            }
        }
    }

    Ok(())
}
