use anyhow::{Context, Result};
use rollcall_core::LbphClassifier;
use rollcall_store::{GalleryStore, ModelStore, SqliteAttendanceStore, TomlRoster};
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod recorder;
mod service;
mod trainer;

#[cfg(test)]
mod testing;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// Written on first start when no roster exists.
const SEED_ROSTER: &str = r#"# Rollcall members. Roles: admin, teacher, student.
# `uid` is the Unix account that acts as the member over D-Bus.

[[member]]
username = "admin"
role = "admin"
uid = 0

[[member]]
username = "teacher1"
role = "teacher"

[[member]]
username = "student1"
role = "student"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = config::Config::from_env();
    tracing::info!(
        gallery = %config.gallery_dir.display(),
        model = %config.model_path.display(),
        db = %config.db_path.display(),
        face_size = config.face_size,
        require_match = config.require_match,
        "configuration loaded"
    );

    let roster = load_roster(&config.roster_path)?;
    tracing::info!(members = roster.len(), "roster loaded");

    let gallery = GalleryStore::open(&config.gallery_dir)
        .with_context(|| format!("opening gallery {}", config.gallery_dir.display()))?;
    let models = ModelStore::new(&config.model_path);
    let attendance = SqliteAttendanceStore::open(&config.db_path)
        .with_context(|| format!("opening attendance database {}", config.db_path.display()))?;

    let trainer = trainer::Trainer::new(
        gallery.clone(),
        models,
        LbphClassifier::default(),
        config.face_size,
    );

    // Bring up a model for a gallery that predates the artifact.
    let needs_model = match trainer.models().current_version() {
        Ok(version) => version.is_none(),
        Err(e) => {
            tracing::warn!(error = %e, "current model artifact unusable");
            true
        }
    };
    if needs_model && !gallery.list_identities()?.is_empty() {
        match trainer.train() {
            Ok(report) => tracing::info!(version = report.version, "{}", report.message),
            Err(e) => tracing::warn!(error = %e, "startup training failed"),
        }
    }

    let pipeline = service::Pipeline::new(
        gallery,
        trainer,
        recorder::Recorder::new(Box::new(attendance)),
        Box::new(roster),
        service::MatchPolicy {
            require_match: config.require_match,
            max_distance: config.max_distance,
        },
    );
    let engine = engine::spawn_engine(pipeline)?;

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, dbus_interface::AttendanceService::new(engine))?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME}"))?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

fn load_roster(path: &Path) -> Result<TomlRoster> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no roster found; writing default members");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, SEED_ROSTER)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    TomlRoster::load(path).with_context(|| format!("loading roster {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_store::{Role, Roster};

    #[test]
    fn test_missing_roster_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/roster.toml");

        let roster = load_roster(&path).unwrap();
        assert!(path.exists());
        assert_eq!(roster.len(), 3);
        let admin = roster.resolve("admin").unwrap();
        assert_eq!(roster.role(&admin), Some(Role::Admin));
        assert_eq!(roster.identity_for_uid(0), Some(admin));
    }

    #[test]
    fn test_existing_roster_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "[[member]]\nusername = \"ms.k\"\nrole = \"teacher\"\n").unwrap();

        let roster = load_roster(&path).unwrap();
        assert_eq!(roster.len(), 1);
        assert!(roster.resolve("admin").is_none());
    }
}
