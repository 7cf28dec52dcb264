//! 核心层：错误码与错误记录、错误分类与退避、只读状态投影

pub mod classifier;
pub mod error;
pub mod state;

pub use classifier::{is_network_error, is_recoverable_error, RetryPolicy};
pub use error::{ErrorCode, ErrorRecord, SessionError, VerificationError};
pub use state::{SessionsView, SkillsView};
