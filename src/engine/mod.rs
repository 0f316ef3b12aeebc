//! Core engine: scan orchestration, the alert watcher and the top digest.

pub mod digest;
pub mod orchestrator;
pub mod watcher;

pub use digest::{format_digest, DigestReport, TopDigest};
pub use orchestrator::{ScanHandle, ScanOrchestrator};
pub use watcher::{AlertHandle, AlertWatcher, TickReport};
