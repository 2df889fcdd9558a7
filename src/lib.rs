//! # rkndaemon - Registry dump ingestion daemon
//!
//! Periodically downloads the registry of blocked resources and the social
//! resources register, classifies every entry into canonical blocklists and
//! publishes them as plain text files for firewalls, DNS filters and proxies.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        rkndaemon                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run, classify, ipset-sync, version         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml + RKN_* environment)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Daemon                                                     │
//! │    ├── dump feed: version gate, marker, post hook           │
//! │    ├── social feed                                          │
//! │    └── HTTP file server (axum, X-Auth-Token)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fetcher (reqwest, SOAP)  →  Archive (zip)                  │
//! │    →  Decoder (quick-xml, encoding_rs)                      │
//! │    →  Classifier (url, idna)  →  text files                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resolver (hickory-resolver + getaddrinfo worker pool)      │
//! │    └── resolved.txt                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use rkndaemon::classifier::{BlockedIpPolicy, Classifier};
//! use rkndaemon::daemon::{classify_document, Feed};
//! use std::fs::File;
//! use std::io::BufReader;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let xml = BufReader::new(File::open("dump.xml")?);
//!     let mut classifier = Classifier::new(BlockedIpPolicy::Always);
//!     classify_document(Feed::Dump, xml, &mut classifier)?;
//!     classifier.publish(Path::new("output"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`archive`] - Streaming access to the zip-packed registry document
//! - [`classifier`] - Entry classification and list publishing
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - External program execution (hooks, ipset)
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`daemon`] - Feed orchestration
//! - [`decoder`] - Streaming registry XML reader
//! - [`fetcher`] - SOAP client for the registry service
//! - [`http`] - Authenticated file server
//! - [`lock`] - Single-instance lock
//! - [`marker`] - Last processed dump version
//! - [`resolver`] - Concurrent hostname resolution
//! - [`signal`] - Graceful shutdown signal handling
//! - [`utils`] - Formatting helpers

pub mod archive;
pub mod classifier;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod decoder;
pub mod error;
pub mod fetcher;
pub mod hook;
pub mod http;
pub mod lock;
pub mod marker;
pub mod registry;
pub mod resolver;
pub mod set;
pub mod signal;
pub mod uri;
pub mod utils;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
