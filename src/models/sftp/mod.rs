// SFTP 数据模型

pub mod transfer;
pub mod types;

pub use transfer::{TransferDirection, TransferOutcome, TransferProgress, TransferRequest};
pub use types::{format_size, get_parent_path, join_path, sort_entries, DirectoryEntry};
