//! # apiloom
//!
//! Declarative HTTP integration runner.
//!
//! Operators describe integration "groups" in YAML: named origins (base
//! URL + optional connection string), each with a list of jobs. A job is
//! either an `auth` job (establishes a session token) or a `request` job
//! (issues an HTTP call and feeds the response to a sink). Jobs declare
//! dependencies on one another; the runner resolves execution order,
//! substitutes `$ENV_`/`$SESSION_`/`{{jobId.field}}`/`$DATE` placeholders
//! into every string field, executes each job (with retry and 401
//! re-auth), and writes results to a file or SQL Server table.
//!
//! ## Quick Start
//!
//! ```no_run
//! use apiloom::cli::Cli;
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> apiloom::Result<()> {
//!     let cli = Cli::parse();
//!     apiloom::cli::dispatch(cli).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! YAML config → Config loader → Orchestrator
//!                                   │
//!                    ┌──────────────┼───────────────┐
//!              Dependency      Job Executor ──→ Session Store
//!              Resolver              │
//!                               Substitutor ←── Invocation Cache
//!                                    │
//!                          HTTP Client / Authenticator
//!                                    │
//!                              Sink (file, SQL Server)
//! ```

// Public API exports
pub use errors::{ApiloomError, Result};

// Public modules
pub mod auth;
pub mod cache;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod executor;
pub mod http;
pub mod log;
pub mod orchestrator;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod template;
