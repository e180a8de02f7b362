//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "modgate", about = "Moderation-gated LLM proxy")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    Pretty,
    Json,
}
