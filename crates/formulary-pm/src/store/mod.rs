//! The install store: versioned prefixes, receipts and install locks.

mod installer;
mod locks;
mod record;

pub use installer::StoreInstaller;
pub use locks::{StoreLock, StoreLocks};
pub use record::{InstallRecord, RECEIPT_FILE};
