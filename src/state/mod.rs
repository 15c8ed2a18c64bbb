// 会话状态模块

mod registry;

pub use registry::{CloseOutcome, SessionRegistry, SessionStatus};
