//! goval CLI - interactive shell over a goval session.

pub mod cli;
pub mod error;
pub mod logging;
pub mod repl;
pub mod shell;

pub use error::{CliError, Result};
pub use repl::{ReplCommand, parse_line};
pub use shell::{Flow, Shell};
