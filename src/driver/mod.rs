//! Option parsing and use-case dispatch.

pub mod cli;
pub mod dispatch;
