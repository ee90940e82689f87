//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use zenith::config::ZenithConfig;
use zenith::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &ZenithConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("It is created on the first `zenith ask`.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Zenith Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Model endpoint:    {}", config.provider.base_url);
    println!("  Generation:      {}", config.provider.model);
    println!("  Embedding:       {}", config.provider.embedding_model);
    if config.provider.api_key.is_empty() {
        println!("  WARNING: no API key set (ZENITH_API_KEY)");
    }
    println!();
    println!("Row counts:");
    println!("  Knowledge:       {}", report.chunk_count);
    println!("  Sessions:        {}", report.session_count);
    println!("  Turns:           {}", report.turn_count);
    println!("  Profile facts:   {}", report.fact_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  2. Or move the file aside; a fresh database is created on next use.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
