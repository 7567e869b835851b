//! Operator subcommands for the coordination database.

use chrono::Utc;
use waggle_core::state::{CoordDb, FindingStore, SessionSupervisor};

pub fn migrate() {
    match CoordDb::open().and_then(|db| {
        db.run_migrations()?;
        db.schema_version()
    }) {
        Ok(version) => println!("coordination database at schema version {version}"),
        Err(e) => {
            eprintln!("migration failed: {e:#}");
            std::process::exit(1);
        }
    }
}

pub fn sessions(project: Option<&str>) {
    let db = match CoordDb::open() {
        Ok(db) => db,
        Err(e) => {
            eprintln!("coordination store unavailable: {e:#}");
            std::process::exit(1);
        }
    };

    let sessions = match SessionSupervisor::new(&db).list_active(project) {
        Ok(sessions) => sessions,
        Err(e) => {
            eprintln!("failed to list sessions: {e:#}");
            std::process::exit(1);
        }
    };

    if sessions.is_empty() {
        println!("no active sessions");
        return;
    }

    let now = Utc::now();
    for s in sessions {
        let age = (now - s.last_heartbeat).num_seconds();
        println!(
            "{}  project={}  heartbeat={}s ago  working_on={}",
            s.id,
            if s.project.is_empty() { "-" } else { &s.project },
            age,
            s.working_on.as_deref().unwrap_or("-"),
        );
    }
}

pub fn findings(topic: &str, limit: usize) {
    let db = match CoordDb::open() {
        Ok(db) => db,
        Err(e) => {
            eprintln!("coordination store unavailable: {e:#}");
            std::process::exit(1);
        }
    };

    match FindingStore::new(&db).by_topic(topic, limit) {
        Ok(findings) if findings.is_empty() => println!("no findings on '{topic}'"),
        Ok(findings) => {
            for f in findings {
                println!(
                    "[{}] {}: {}{}",
                    f.created_at.format("%Y-%m-%d %H:%M"),
                    f.session_id,
                    f.finding,
                    if f.relevant_to.is_empty() {
                        String::new()
                    } else {
                        format!("  ({})", f.relevant_to.join(", "))
                    },
                );
            }
        }
        Err(e) => {
            eprintln!("failed to list findings: {e:#}");
            std::process::exit(1);
        }
    }
}

pub fn health() {
    let db = match CoordDb::open() {
        Ok(db) => db,
        Err(e) => {
            eprintln!("unhealthy: cannot open coordination store: {e:#}");
            std::process::exit(1);
        }
    };

    let version = db.schema_version().unwrap_or(0);
    println!("store: ok (schema v{version})");

    match db.table_counts() {
        Ok(counts) => {
            for (table, count) in counts {
                println!("  {table}: {count}");
            }
        }
        Err(e) => {
            eprintln!("unhealthy: {e:#}");
            std::process::exit(1);
        }
    }
}
