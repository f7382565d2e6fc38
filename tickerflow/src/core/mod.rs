//! Core domain model types for tickerflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The opaque identifier and run correlation id
//! - Stage, group and backlog entry statuses
//! - Stage and group results, and the final pipeline result

mod final_result;
mod identifier;
mod result;
mod status;

pub use final_result::{FinalResult, GroupSection, MergedContext, SectionPart, Synthesis};
pub use identifier::{Identifier, IdentifierForm, RunId};
pub use result::{GroupResult, StageResult};
pub use status::{EntryStatus, GroupStatus, StageStatus};
