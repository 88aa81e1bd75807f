use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    zaapi_sessions::{SessionRecord, SessionStore},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List sessions found under the session root.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_sessions(action: SessionAction) -> Result<()> {
    let config = zaapi_config::discover_and_load();
    match action {
        SessionAction::List { json } => list(&config.sessions.root(), json),
    }
}

/// Records on disk, skipping directories without a readable one.
fn load_records(root: &Path) -> Result<Vec<SessionRecord>> {
    let store = SessionStore::new(root);
    let mut records = Vec::new();
    for id in store.list_ids()? {
        match store.read(&id) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {},
            Err(e) => tracing::warn!(session = %id, error = %e, "unreadable session record"),
        }
    }
    Ok(records)
}

fn list(root: &Path, json: bool) -> Result<()> {
    let records = load_records(root)?;
    if json {
        let rows: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "status": r.status,
                    "created_at": r.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No sessions under {}", root.display());
        return Ok(());
    }
    let width = records.iter().map(|r| r.id.len()).max().unwrap_or(2).max(2);
    println!("{:<width$}  STATUS", "ID");
    for record in &records {
        let status = serde_json::to_value(record.status)?;
        println!("{:<width$}  {}", record.id, status.as_str().unwrap_or("?"));
    }
    Ok(())
}
