//! Managed module model.
//!
//! The build pipeline operates on an in-memory model of compiled modules rather than on a
//! live runtime type system. This module holds that model and everything needed to load,
//! query and persist it.
//!
//! # Key Components
//!
//! - [`module::ModuleDefinition`] - One compiled module tagged with its target architecture
//! - [`typedef::TypeDefinition`] / [`method::MethodDefinition`] - Type and method definitions
//! - [`signatures::TypeSignature`] - Parameter, return and field types, with blittability rules
//! - [`index::TypeDefinitionIndex`] - Name-based "is-a" and "implements" queries across modules
//! - [`format`] - Binary module image reader and writer
//! - [`diagnostics::Diagnostics`] - Collector for build warnings
//! - [`token::Token`] - Stable references to definitions and imported members

pub mod diagnostics;
pub mod format;
pub mod index;
pub mod method;
pub mod module;
pub mod signatures;
pub mod token;
pub mod typedef;
