pub mod init;
pub mod plan;
pub mod project;
pub mod run;
pub mod status;

pub use init::handle_init;
pub use plan::handle_plan;
pub use run::handle_run;
pub use status::{handle_mappings, handle_status, handle_unlock};
