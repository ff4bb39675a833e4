use thiserror::Error;

use crate::arch::TargetArch;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant that aborts a build carries enough identity (type, method, module, file or
/// shard id) for the failure to be actionable from the message alone, without re-running the
/// build at a higher verbosity.
///
/// # Error Categories
///
/// ## Classification Errors
/// - [`Error::InvalidPeerType`] - Type implements the foreign-object marker without an allowed base
/// - [`Error::DuplicateType`] - Same logical type defined twice for one architecture slot
/// - [`Error::AbiMixing`] - Agnostic and architecture-specific definitions for one logical type
/// - [`Error::UnsupportedAbi`] - Module tagged with an ABI name that is not recognized
///
/// ## Rewriting Errors
/// - [`Error::UnsupportedSignature`] - Native callback with a non-blittable, non-convertible type
/// - [`Error::UnsupportedMarshal`] - Conversion requested that the wrapper generator cannot emit
/// - [`Error::MissingAttributeConstructor`] - Native entry point marker cannot be imported
/// - [`Error::InvalidInstruction`] - Malformed instruction sequence rejected by the builder
///
/// ## Binary Format Errors
/// - [`Error::BlobMagic`] / [`Error::BlobVersion`] - Unknown container header
/// - [`Error::ShardDivergence`] - Shards sharing an id differ between architectures
/// - [`Error::Malformed`] - Corrupted or truncated binary input
/// - [`Error::OutOfBounds`] - Attempted to read beyond a buffer
/// - [`Error::LayoutError`] - Native structure could not be laid out
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::ArchiveError`] - Errors from the zip archive reader
/// - [`Error::GoblinErr`] - ELF parsing errors from goblin crate
///
/// # Examples
///
/// ```rust,no_run
/// use peerweave::{Error, blob::BlobSet};
///
/// match BlobSet::open("obj/assemblies.blob") {
///     Ok(set) => println!("{} assemblies", set.assemblies().len()),
///     Err(Error::ShardDivergence { shard_id, arch }) => {
///         eprintln!("shard {shard_id} differs for {arch}");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A type implements the foreign-object marker interface but derives from neither
    /// allowed root class.
    ///
    /// This is an interop contract violation that would crash at runtime, so it is never
    /// downgraded to a warning.
    #[error("Type `{type_name}` in module '{module}' implements the foreign object interface but does not inherit from an allowed peer root")]
    InvalidPeerType {
        /// Full name of the offending type
        type_name: String,
        /// File name of the module the type was found in
        module: String,
    },

    /// The same logical type was contributed twice for the same architecture slot.
    #[error("Duplicate type '{type_name}' in module '{second}' (first defined in '{first}')")]
    DuplicateType {
        /// Full name of the duplicated type
        type_name: String,
        /// Module holding the first definition
        first: String,
        /// Module holding the conflicting definition
        second: String,
    },

    /// A logical type has both an architecture-agnostic and an architecture-specific definition.
    #[error("Type '{type_name}' is defined in ABI-agnostic module '{module}' and also for ABI {arch}")]
    AbiMixing {
        /// Full name of the type
        type_name: String,
        /// Module containing the agnostic definition
        module: String,
        /// Architecture of the specific definition
        arch: TargetArch,
    },

    /// A module was tagged with an ABI string that does not map to a known architecture.
    #[error("Unsupported ABI '{abi}' for module '{module}'")]
    UnsupportedAbi {
        /// The ABI string as provided
        abi: String,
        /// Module name or path
        module: String,
    },

    /// A native callback uses a type that is neither blittable nor convertible.
    #[error("Method '{type_name}::{method}' has an unsupported non-blittable {parameter} and cannot be used as a native entry point")]
    UnsupportedSignature {
        /// Owning type of the method
        type_name: String,
        /// Method name
        method: String,
        /// Description of the failing parameter or return type
        parameter: String,
    },

    /// The wrapper generator was asked to convert something other than the boolean case.
    #[error("Unsupported marshaling in wrapper for '{method}': {reason}")]
    UnsupportedMarshal {
        /// Method the wrapper was generated for
        method: String,
        /// What could not be converted
        reason: String,
    },

    /// The native entry point marker attribute constructor could not be found.
    #[error("Unable to find constructor of '{attribute}' in module '{module}'")]
    MissingAttributeConstructor {
        /// Full name of the attribute type
        attribute: String,
        /// Provider module that was searched
        module: String,
    },

    /// An instruction sequence was rejected while building it.
    #[error("Invalid instruction sequence: {0}")]
    InvalidInstruction(String),

    /// Bad magic in a blob container header.
    #[error("Invalid blob header magic number in '{path}'")]
    BlobMagic {
        /// File or archive entry that was read
        path: String,
    },

    /// Unsupported blob container format version.
    #[error("Blob format version {version} in '{path}' is not supported (highest supported is {supported})")]
    BlobVersion {
        /// File or archive entry that was read
        path: String,
        /// Version found in the header
        version: u32,
        /// Highest version this reader understands
        supported: u32,
    },

    /// Two shards sharing an id have different content.
    ///
    /// This typically means an assembly expected to be architecture-agnostic was built
    /// differently for one of the target architectures.
    #[error("Blob shard {shard_id} for architecture {arch} is not identical to other shards with the same ID")]
    ShardDivergence {
        /// The shard id shared by the diverging shards
        shard_id: u32,
        /// Architecture of the shard that differs from the first one
        arch: TargetArch,
    },

    /// A native structure or data section could not be laid out.
    #[error("Native layout error: {0}")]
    LayoutError(String),

    /// The file is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the zip crate while reading a packaged archive.
    #[error("{0}")]
    ArchiveError(#[from] zip::result::ZipError),

    /// Error from the goblin crate during ELF parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
