//! # peerweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! peerweave library. Import it to get quick access to the build stages, their
//! configuration and their outputs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all peerweave operations
pub use crate::Error;

/// The result type used throughout peerweave
pub use crate::Result;

/// Target architectures and pointer widths
pub use crate::arch::{PointerWidth, TargetArch};

// ================================================================================================
// Configuration
// ================================================================================================

/// Build configuration
pub use crate::config::{
    AppConfigOptions, BlobWriterConfig, BoundExceptionType, MarshalAttribute, MonoComponent,
    PackageNamingPolicy, PeerRoots, PipelineConfig, SpecialEntryPoint,
};

// ================================================================================================
// Managed Module Model
// ================================================================================================

/// Modules, types, methods and tokens
pub use crate::metadata::{
    diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
    method::MethodDefinition,
    module::ModuleDefinition,
    signatures::{MethodSignature, TypeSignature},
    token::Token,
    typedef::TypeDefinition,
};

// ================================================================================================
// Build Stages
// ================================================================================================

/// Type discovery
pub use crate::scanner::{load_modules, ManagedType, ModuleInput, PeerClassification, TypeScanner};

/// Method registration
pub use crate::classifier::{
    CallableMethod, MethodClassifier, RegistrationTable, RegistrationVerdict, Registrations,
};

/// Native entry points
pub use crate::rewriter::{NativeEntryPoint, SignatureRewriter};

/// The complete managed pipeline
pub use crate::pipeline::{BuildPipeline, PipelineOutput};

// ================================================================================================
// Native Metadata
// ================================================================================================

/// Native metadata generation
pub use crate::native::{
    CompressedAssemblyInfo, DsoCache, NativeImage, NativeLibrary, NativeMetadata,
    NativeMetadataGenerator,
};

// ================================================================================================
// Blob Containers
// ================================================================================================

/// Blob writing and reading
pub use crate::blob::{BlobAssembly, BlobAssemblyInput, BlobSet, BlobShard, BlobWriter, Manifest};
