//! Command-line templates for the external CLIs

pub mod flags;
pub mod template;

pub use flags::{CommandFlags, SubCommand};
pub use template::{
    placeholders, shell_quote, CommandTemplate, Operation, TemplateRegistry, Tool, ToolVersion,
};
