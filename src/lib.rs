pub mod error;
pub mod entry;
pub mod version;
pub mod superblock;
pub mod crypto;
pub mod codec;
pub mod block;
pub mod header;
pub mod guard;
pub mod io_stream;
pub mod plan;

pub use error::{AtcError, Result};
pub use entry::FileEntry;
pub use version::FormatVersion;
pub use codec::CodecId;
pub use crypto::KdfParams;
pub use io_stream::{ContainerInfo, Locker, LockerOptions, Unlocker};
pub use plan::{plan_for, DetectedMode, Plan};
