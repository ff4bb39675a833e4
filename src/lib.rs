// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/mod.rs' and 'file/output.rs' use mmap

//! # peerweave
//!
//! Build-time bridge between a managed runtime and a foreign (Java) object model on Android.
//!
//! `peerweave` takes the compiled modules of an application, finds the managed types that
//! mirror foreign objects ("peer types"), decides how their overriding methods are exposed to
//! native code, rewrites callbacks into native entry points, and produces the two binary
//! artifacts the runtime loader consumes at startup: per-architecture native metadata and
//! blob containers bundling the assemblies.
//!
//! Every output has a byte-exact contract with a native consumer, and every input spans
//! several architecture-specific builds of the same code. Conflicts between those builds are
//! reported as errors rather than resolved silently.
//!
//! ## Pipeline
//!
//! ```text
//! modules ──► TypeScanner ──► MethodClassifier ──► SignatureRewriter ──► rewritten modules
//!                                    │                     │
//!                                    ▼                     ▼
//!                              registrations        native entry points
//!
//! libraries, config ──► NativeMetadataGenerator ──► assembler source per architecture
//! assemblies        ──► BlobWriter              ──► {base}.blob, {base}.N.{abi}.blob, manifest
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peerweave::prelude::*;
//!
//! let mut modules = load_modules(&[
//!     ModuleInput::new("obj/Release/Mono.Android.pwmd", ""),
//!     ModuleInput::new("obj/Release/App.pwmd", ""),
//! ])?;
//! let provider = ModuleDefinition::from_file("obj/Release/System.Runtime.InteropServices.pwmd")?;
//!
//! let output = BuildPipeline::run(&mut modules, &provider, &PipelineConfig::release())?;
//! println!(
//!     "{} peer types, {} native entry points",
//!     output.types.len(),
//!     output.native_entry_points.len()
//! );
//! for warning in output.diagnostics.warnings() {
//!     println!("{warning}");
//! }
//! # Ok::<(), peerweave::Error>(())
//! ```
//!
//! ## Reading blob containers
//!
//! ```rust,no_run
//! use peerweave::blob::BlobSet;
//!
//! let set = BlobSet::open("app-release.apk")?;
//! for assembly in set.assemblies() {
//!     println!("{:>4} {:03}/{:04} {}", assembly.mapping_index, assembly.shard_id, assembly.local_index, assembly.name);
//! }
//! # Ok::<(), peerweave::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Fatal conditions abort with an [`Error`] naming
//! the type, method, module or file involved; recoverable findings are collected in a
//! [`metadata::diagnostics::Diagnostics`] and logged through the [`log`] facade.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use peerweave::prelude::*;
///
/// let modules = vec![ModuleDefinition::from_file("obj/App.pwmd")?];
/// let types = TypeScanner::default().scan(&modules)?;
/// # Ok::<(), peerweave::Error>(())
/// ```
pub mod prelude;

pub mod arch;
pub mod assembly;
pub mod blob;
pub mod classifier;
pub mod config;
pub mod file;
pub mod metadata;
pub mod native;
pub mod pipeline;
pub mod rewriter;
pub mod scanner;
pub mod utils;

/// `peerweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `peerweave` Error type
///
/// See [`error::Error`] for the list of variants.
pub use error::Error;

pub use arch::TargetArch;
pub use pipeline::{BuildPipeline, PipelineOutput};
