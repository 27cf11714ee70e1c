//! Core library for Coauthor.
//!
//! Pure building blocks of the writing workbench: text chunking, keyword
//! relevance scoring, chapter parsing, prompt construction, and the
//! collaborator traits (embedding, generation, history, rules, blobs)
//! that the application crate wires to real backends.

pub mod chapters;
pub mod chunk;
pub mod clients;
pub mod models;
pub mod prompt;
pub mod score;
pub mod store;
