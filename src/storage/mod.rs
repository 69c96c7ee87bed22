//! Record storage, the session log and the on-disk layout

mod har;
mod paths;
mod record_store;
mod session_log;

pub use har::{export_har_to_path, records_to_har};
pub use paths::StoragePaths;
pub use record_store::{RecordEvent, RecordSnapshot, RecordStore};
pub use session_log::SessionLog;
