//! rollcall-store — Persistence for the attendance pipeline.
//!
//! Filesystem enrollment gallery, atomically published model artifacts,
//! SQLite attendance records and the TOML member roster.

pub mod attendance;
pub mod gallery;
pub mod models;
pub mod roster;

pub use attendance::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, InsertOutcome, NewAttendance,
    SqliteAttendanceStore, StoreError,
};
pub use gallery::{GalleryError, GalleryStore, ImageRef};
pub use models::{ModelStore, ModelStoreError};
pub use roster::{Role, Roster, RosterError, TomlRoster};
