//! # Tally: dashboard data preparation
//!
//! **Version**: 0.1.0
//!
//! Tally turns raw tabular exports into presentation-ready aggregates. It
//! covers two datasets: marathon runner results and lab sample test results.
//! Both load once into an immutable Arrow-backed table. Every query returns
//! a fresh batch or a list of serde records and never mutates the source.
//!
//! ## Building blocks
//!
//! - [`duration`]: `MM:SS` / `HH:MM:SS` text to decimal minutes
//! - [`bands`]: ages to labelled bands (`"30-40"`, `"90+"`)
//! - [`expiration`]: days-to-expire to a risk status
//! - [`normalize`]: lab reading tokens (`<LOQ`, `NO RfD`, `12.5`) to a
//!   tagged [`normalize::Reading`]
//! - [`query`]: group-by / filter / aggregate / top-N over a [`storage::Table`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use tally::bands::AgeBands;
//! use tally::marathon::RunnerTable;
//!
//! let runners = RunnerTable::load_csv("data/nyc_marathon_2024.csv", &AgeBands::default())?;
//! let summary = runners.summary()?;
//! println!("{} runners from {} countries", summary.runners, summary.nationalities);
//!
//! let top = runners.top_countries(10, &BTreeSet::new())?;
//! println!("{} country rows", top.num_rows());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bands;
pub mod config;
pub mod duration;
pub mod error;
pub mod expiration;
pub mod lab;
pub mod marathon;
pub mod normalize;
pub mod query;
pub mod storage;
pub mod topk;

pub use error::{Error, Result};
