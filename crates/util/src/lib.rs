pub mod config;
pub mod naming;
pub mod paths;
pub mod text_processing;

pub use config::{ConfigError, InterfaceKind, RunbookConfig, RunbookConfigOverrides};
pub use naming::{camel_to_kebab, normalize_runbook_id};
pub use paths::{expand_tilde, sanitize_file_component};
pub use text_processing::{render_placeholders, truncate_to_width, wrap_indented};
