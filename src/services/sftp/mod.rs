// SFTP 后端服务

mod pane;
mod service;
mod transfer;

pub use pane::SftpPane;
pub use service::SftpService;
pub use transfer::TransferSession;
