pub mod cascade;
pub mod context;
pub mod document;
pub mod knowledge_base;
pub mod membership;
pub mod ranking;

mod error;

pub use error::{Error, Result};
