//! CLI `profile` command: print the long-term facts stored for a user.

use anyhow::Result;

use zenith::config::ZenithConfig;
use zenith::db;
use zenith::memory::{Persistence, SqliteStore};

pub async fn profile(config: &ZenithConfig, user: &str) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let store = SqliteStore::new(db::share(conn));
    let facts = store.load_profile(user).await?;

    if facts.is_empty() {
        println!("No profile facts stored for {user}.");
        return Ok(());
    }

    let width = facts.iter().map(|f| f.key.len()).max().unwrap_or(0);
    println!("Profile for {user} ({} facts)", facts.len());
    println!();
    for fact in &facts {
        println!(
            "  {:<width$}  {}  (confidence {:.2}, updated {})",
            fact.key, fact.value, fact.confidence, fact.updated_at
        );
    }
    Ok(())
}
