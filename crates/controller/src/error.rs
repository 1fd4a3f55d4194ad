//! Controller error taxonomy

use thiserror::Error;

use gangway_ports::PortError;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("failed to create {failed} pods of {total}")]
    CreatePods { failed: usize, total: usize },

    #[error("failed to delete {failed} pods of {total}")]
    DeletePods { failed: usize, total: usize },

    #[error("failed to kill {failed} of {total}")]
    KillPods { failed: usize, total: usize },

    #[error("plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("job {0} not found")]
    JobNotFound(String),
}
