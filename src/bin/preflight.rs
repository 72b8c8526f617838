use std::fs;

use resource_projection::infra::{config, logging};
use resource_projection::storage::files;
use resource_projection::{EngineConfig, PgDatastore};

/// Child tables the update path clears through `ON DELETE CASCADE`.
const DEFAULT_TABLES: &[&str] = &[
    "profile_project",
    "profile_project_role",
    "profile_project_role_skill",
    "profile_project_role_duty",
    "profile_advertised",
    "profile_advertised_example",
    "profile_span",
    "event_category",
    "event_setting",
    "event_tag",
    "event_span",
    "post_category",
    "post_tag",
    "post_span",
    "post_kind",
];

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [--migrate] [table ...]\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL, STORAGE_ROOT\n\
         Optional:\n\
           SLUG_LEN, SITE_NAME, PUBLIC_PREFIX, RETRY_TX_ATTEMPTS, RETRY_DISK_ATTEMPTS\n\
         \n\
         Without table names the bundled child tables are checked.\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }
    if let Some(unknown) = args.iter().find(|a| a.starts_with('-') && *a != "--migrate") {
        eprintln!("Unknown flag {unknown:?}");
        usage_and_exit();
    }
    let migrate = args.iter().any(|a| a == "--migrate");
    let mut tables: Vec<String> = args.iter().filter(|a| !a.starts_with('-')).cloned().collect();
    if tables.is_empty() {
        tables = DEFAULT_TABLES.iter().map(|t| t.to_string()).collect();
    }

    // Force-read config (nice error messages if missing)
    let cfg = EngineConfig::from_env()?;
    let database_url = config::database_url()?;

    println!("> Preflight:");
    println!("  STORAGE_ROOT={}", cfg.storage_root.display());
    println!("  SLUG_LEN={}", cfg.slug_len);
    println!("  SITE_NAME={}", cfg.site_name);
    println!(
        "  Retry attempts: tx={} disk={}",
        cfg.retry.tx.retries + 1,
        cfg.retry.disk.retries + 1
    );

    // Storage root writable
    if !cfg.storage_root.is_dir() {
        return Err(anyhow::anyhow!(
            "STORAGE_ROOT {} is not a directory",
            cfg.storage_root.display()
        ));
    }
    let probe = cfg.storage_root.join(format!(".preflight-{}", std::process::id()));
    files::create_if_absent(&probe, b"preflight")
        .map_err(|e| anyhow::anyhow!("STORAGE_ROOT is not writable: {}", e))?;
    fs::remove_file(&probe).map_err(|e| anyhow::anyhow!("Failed to remove {}: {}", probe.display(), e))?;
    println!("  Storage root is writable.");

    // Database connectivity
    let store = PgDatastore::connect(&database_url).await?;
    let version: String = sqlx::query_scalar("SELECT version()").fetch_one(store.pool()).await?;
    println!("  Database: {}", version);

    if migrate {
        println!("  Running migrations...");
        store.migrate().await?;
        println!("  Migrations applied.");
    }

    // Cascading deletes on every checked child table
    let missing = store.missing_cascades(&tables).await?;
    if !missing.is_empty() {
        for t in &missing {
            eprintln!("  {} has a ref_id foreign key without ON DELETE CASCADE", t);
        }
        return Err(anyhow::anyhow!(
            "{} table(s) lack cascading deletes; updates would leave stale rows",
            missing.len()
        ));
    }
    println!("  {} table(s) cascade on delete.", tables.len());

    println!("> Preflight OK.");
    Ok(())
}
