use rollcall_core::FACE_SIZE;
use std::path::PathBuf;

/// Smallest face side that still fills an 8x8 LBPH grid with useful cells.
const MIN_FACE_SIZE: u32 = 16;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-identity enrollment gallery.
    pub gallery_dir: PathBuf,
    /// Path of the current model artifact.
    pub model_path: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// TOML roster of members and roles.
    pub roster_path: PathBuf,
    /// Side length faces are normalized to before training and prediction.
    pub face_size: u32,
    /// Refuse to mark attendance unless the recognized identity matches the claimed one.
    pub require_match: bool,
    /// Optional distance cutoff; only applied together with `require_match`.
    pub max_distance: Option<f64>,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        Self {
            gallery_dir: env_path("ROLLCALL_GALLERY_DIR", || data_dir.join("uploads")),
            model_path: env_path("ROLLCALL_MODEL_PATH", || data_dir.join("lbph_model.json")),
            db_path: env_path("ROLLCALL_DB_PATH", || data_dir.join("attendance.db")),
            roster_path: env_path("ROLLCALL_ROSTER_PATH", || data_dir.join("roster.toml")),
            face_size: face_size(std::env::var("ROLLCALL_FACE_SIZE").ok()),
            require_match: env_flag("ROLLCALL_REQUIRE_MATCH", false),
            max_distance: env_parse("ROLLCALL_MAX_DISTANCE"),
            session_bus: env_flag("ROLLCALL_SESSION_BUS", false),
        }
    }
}

fn face_size(raw: Option<String>) -> u32 {
    let Some(raw) = raw else {
        return FACE_SIZE;
    };
    match raw.parse::<u32>() {
        Ok(size) if size >= MIN_FACE_SIZE => size,
        _ => {
            tracing::warn!(
                value = %raw,
                min = MIN_FACE_SIZE,
                default = FACE_SIZE,
                "invalid ROLLCALL_FACE_SIZE; using default"
            );
            FACE_SIZE
        }
    }
}

fn env_path(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| default())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_size_validation() {
        assert_eq!(face_size(None), FACE_SIZE);
        assert_eq!(face_size(Some("96".into())), 96);
        assert_eq!(face_size(Some("0".into())), FACE_SIZE);
        assert_eq!(face_size(Some("8".into())), FACE_SIZE);
        assert_eq!(face_size(Some("big".into())), FACE_SIZE);
    }
}
