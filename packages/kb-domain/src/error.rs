use crate::document::DocumentStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	InvalidScopeOwners { message: String },
	#[error("Invalid transition from {from} to {to}.")]
	InvalidTransition { from: DocumentStatus, to: DocumentStatus },
	#[error("{message}")]
	InvalidValue { message: String },
}
