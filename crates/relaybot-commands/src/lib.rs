//! Role-gated command surface: `/help`, `/token`, `/raw`, `/status`,
//! `/tasks`, `/context`, `/prompt`, `/log` (developer); `/reload`,
//! `/summarize`, `/clear_context` (admin) — §4.5.

pub mod error;
pub mod registry;
pub mod router;

pub use error::{CommandError, Result};
pub use router::CommandRouter;
