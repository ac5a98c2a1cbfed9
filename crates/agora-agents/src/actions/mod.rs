//! Action execution for agent actions.
//!
//! # Submodules
//!
//! - [`costs`] -- Energy charged per action kind.
//! - [`handlers`] -- Rule checks and state changes for each action.

pub mod costs;
pub mod handlers;
