//! Core functionality for mnemo
//!
//! This crate holds the adaptive learning core of an assistant: episodic
//! memory, user preferences, a knowledge graph, a feedback ledger, behavior
//! adaptation, and the validation gate that every consequential change goes
//! through. [`LearningCore`] is the boundary the surrounding assistant uses.

pub mod adaptation;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod feedback;
pub mod knowledge;
pub mod memory;
pub mod orchestrator;
pub mod preferences;
pub mod storage;
pub mod validation;

pub use config::CoreConfig;
pub use error::{LearningError, Result};
pub use orchestrator::{
    ContextBundle, CoreStats, ExportManifest, FeedbackOutcome, IngestOutcome, LearningCore, ProposalOutcome,
    ProposalStatus, ResetConfirmation,
};
