// 数据模型模块

pub mod monitor;
pub mod server;
pub mod settings;
pub mod sftp;

pub use monitor::SystemInfo;
pub use server::{mask_host, ConnectionConfig};
pub use settings::CoreSettings;
pub use sftp::{DirectoryEntry, TransferDirection, TransferOutcome, TransferProgress, TransferRequest};
