//! Agent runner implementations.

pub mod claude_code;
pub mod codex;
pub mod process;

pub use claude_code::{ClaudeCodeConfig, ClaudeCodeRunner};
pub use codex::{CodexConfig, CodexRunner};
pub use process::ProcessGuard;
