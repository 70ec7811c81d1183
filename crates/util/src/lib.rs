pub mod path_processing;
pub mod text_processing;

pub use path_processing::expand_tilde;
pub use text_processing::{CREDENTIAL_FLAG, redact_arguments, redact_sensitive, redact_sensitive_with, strip_ansi};
