//! QuizForge - asynchronous document-to-quiz generation pipeline.
//!
//! Turns uploaded lecture documents into multiple-choice quizzes: text
//! extraction (with OCR fallback), semantic chunking, embedding, retrieval,
//! and constrained question generation, all driven by a durable SQLite-backed
//! job queue.

pub mod chunker;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod queue;
pub mod repository;
pub mod retrieval;
pub mod services;
pub mod storage;
