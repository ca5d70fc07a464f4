pub mod admin;
pub mod config;
pub mod db;
pub mod digest;
pub mod directory;
pub mod error;
pub mod lock;
pub mod mailer;
pub mod model;
pub mod scheduler;
pub mod updates;

pub use digest::NotificationsDigest;
pub use error::{DigestError, DigestResult};
pub use lock::{ExclusiveUpdateLock, LockPolicy, LockStore};
pub use updates::{CycleOutcome, CycleReport, UpdatesProcessor, UpdatesSettings, WindowCursor};
