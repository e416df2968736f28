//! Hearth core library: the streaming session controller, the token channel it listens on,
//! and the generation backend it drives. Used by the `hearth` CLI.

pub mod backend;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod init;
pub mod llm;
pub mod sanitize;
pub mod session;
