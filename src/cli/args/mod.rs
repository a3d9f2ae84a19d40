//! Shared CLI argument types
//!
//! This module contains reusable argument structs that can be flattened
//! into commands using `#[command(flatten)]`.

mod common;
mod global;
mod page;

pub use common::{KindArg, OutputFormat};
pub use global::GlobalOptions;
pub use page::PageArgs;
