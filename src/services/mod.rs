// 后端服务

pub mod command;
pub mod monitor;
pub mod sftp;
pub mod storage;

pub use command::{clean_output, CommandSession, CommandState};
pub use monitor::{CommandRunner, LatencyProbe, LatencyReport, SystemInfoProbe};
pub use sftp::{SftpPane, SftpService, TransferSession};
pub use storage::{ConfigStore, ImportSummary};
