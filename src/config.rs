//! Build configuration.
//!
//! Configuration is plain data: every struct has a [`Default`] and the aggregate
//! [`PipelineConfig`] offers [`PipelineConfig::debug`] and [`PipelineConfig::release`]
//! presets. Loading configuration from project files is left to the caller; the only text
//! format understood here is the environment file (see [`parse_environment`]).
//!
//! # Key Components
//!
//! - [`PeerRoots`] - Names of the peer root classes and marker interfaces
//! - [`SpecialEntryPoint`] - Hooks that are always registered
//! - [`MarshalAttribute`] - Where the native entry point marker attribute lives
//! - [`AppConfigOptions`] - Flags and values of the native application configuration record
//! - [`BlobWriterConfig`] - Blob container layout
//! - [`PipelineConfig`] - Everything above, with presets

use std::{collections::BTreeMap, path::PathBuf};

use bitflags::bitflags;
use strum::{Display, EnumString};

use crate::{arch::TargetArch, Error, Result};

/// Environment variable that turns on `broken_exception_transitions`.
pub const BROKEN_EXCEPTION_TRANSITIONS_VAR: &str = "XA_BROKEN_EXCEPTION_TRANSITIONS";

/// Designated root types of the peer object model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRoots {
    /// Root of all peer classes
    pub object_root: String,
    /// Root of peer exception classes
    pub throwable_root: String,
    /// Interface implemented by every peer interface
    pub peer_marker: String,
    /// Interface every peer class implements through the object root
    pub object_marker: String,
    /// Root of managed exceptions
    pub exception_root: String,
}

impl Default for PeerRoots {
    fn default() -> Self {
        PeerRoots {
            object_root: "Java.Lang.Object".to_string(),
            throwable_root: "Java.Lang.Throwable".to_string(),
            peer_marker: "Java.Interop.IJavaPeerable".to_string(),
            object_marker: "Android.Runtime.IJavaObject".to_string(),
            exception_root: "System.Exception".to_string(),
        }
    }
}

/// A native entry point that is registered regardless of what the scan finds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialEntryPoint {
    /// Full name of the declaring type
    pub type_name: String,
    /// Name of the native callback method
    pub method_name: String,
    /// Foreign method name
    pub jni_name: String,
    /// Foreign method signature
    pub jni_signature: String,
}

impl SpecialEntryPoint {
    /// Construction hook activating a managed peer for a foreign instance
    #[must_use]
    pub fn activate() -> Self {
        SpecialEntryPoint {
            type_name: "Java.Interop.TypeManager+JavaTypeManager".to_string(),
            method_name: "n_Activate".to_string(),
            jni_name: "activate".to_string(),
            jni_signature:
                "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;[Ljava/lang/Object;)V"
                    .to_string(),
        }
    }

    /// Finalization hook releasing the managed peer
    #[must_use]
    pub fn finalize() -> Self {
        SpecialEntryPoint {
            type_name: "Java.Lang.Object".to_string(),
            method_name: "n_Finalize".to_string(),
            jni_name: "finalize".to_string(),
            jni_signature: "()V".to_string(),
        }
    }

    /// The default set of special entry points
    #[must_use]
    pub fn defaults() -> Vec<SpecialEntryPoint> {
        vec![Self::activate(), Self::finalize()]
    }
}

/// Location of the attribute that marks native entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalAttribute {
    /// Assembly name of the module providing the attribute
    pub provider_assembly: String,
    /// Full name of the attribute type
    pub attribute_type: String,
}

impl Default for MarshalAttribute {
    fn default() -> Self {
        MarshalAttribute {
            provider_assembly: "System.Runtime.InteropServices".to_string(),
            attribute_type: "System.Runtime.InteropServices.UnmanagedCallersOnlyAttribute"
                .to_string(),
        }
    }
}

/// How foreign package names are derived from managed namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[repr(u32)]
pub enum PackageNamingPolicy {
    /// Lower-cased namespace
    #[strum(serialize = "Lowercase")]
    Lowercase = 0,
    /// Lower-cased namespace plus assembly name
    #[strum(serialize = "LowercaseWithAssemblyName")]
    LowercaseWithAssemblyName = 1,
    /// Hash of the namespace and assembly (legacy)
    #[strum(serialize = "LowercaseMD5")]
    LowercaseMd5 = 2,
    /// CRC-64 of the namespace and assembly
    #[default]
    #[strum(serialize = "LowercaseCrc64")]
    LowercaseCrc64 = 3,
}

/// How exceptions thrown from bound code surface in managed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[repr(u8)]
pub enum BoundExceptionType {
    /// Wrapped in managed system exceptions
    #[default]
    System = 0,
    /// Surfaced as peer exceptions
    Java = 1,
}

bitflags! {
    /// Optional runtime components included in the application.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MonoComponent: u32 {
        /// Managed debugger support
        const DEBUGGER = 0x01;
        /// Hot reload support
        const HOT_RELOAD = 0x02;
        /// Event tracing support
        const TRACING = 0x04;
    }
}

/// Values of the native application configuration record and its tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfigOptions {
    /// Foreign package name of the application; required
    pub package_name: String,
    /// Ahead-of-time compiled code is used
    pub uses_mono_aot: bool,
    /// The AOT code was produced by the LLVM backend
    pub uses_mono_llvm: bool,
    /// AOT mode name; required when `uses_mono_aot` is set
    pub aot_mode: Option<String>,
    /// Load every assembly at startup
    pub uses_assembly_preload: bool,
    /// Assemblies are linked into a native bundle
    pub is_a_bundled_app: bool,
    /// Exceptions do not propagate across native frames correctly
    pub broken_exception_transitions: bool,
    /// Fast deployment
    pub instant_run_enabled: bool,
    /// The application uses the native method registration attribute
    pub jni_add_native_method_registration_attribute_present: bool,
    /// A runtime configuration blob is packaged
    pub have_runtime_config_blob: bool,
    /// Assemblies are packaged in blob containers instead of individually
    pub have_assembly_store: bool,
    /// How bound exceptions are surfaced
    pub bound_exception_type: BoundExceptionType,
    /// How foreign package names are derived
    pub package_naming_policy: PackageNamingPolicy,
    /// Number of assemblies packaged
    pub number_of_assemblies: u32,
    /// Width of each bundled assembly name buffer, including the terminating NUL
    pub bundled_assembly_name_width: u32,
    /// Number of blob container files packaged
    pub number_of_assembly_store_files: u32,
    /// Runtime components
    pub mono_components: MonoComponent,
    /// Environment variables, sorted by name
    pub environment: BTreeMap<String, String>,
    /// System properties, sorted by name
    pub system_properties: BTreeMap<String, String>,
}

impl Default for AppConfigOptions {
    fn default() -> Self {
        AppConfigOptions {
            package_name: String::new(),
            uses_mono_aot: false,
            uses_mono_llvm: false,
            aot_mode: None,
            uses_assembly_preload: false,
            is_a_bundled_app: false,
            broken_exception_transitions: false,
            instant_run_enabled: false,
            jni_add_native_method_registration_attribute_present: false,
            have_runtime_config_blob: false,
            have_assembly_store: false,
            bound_exception_type: BoundExceptionType::default(),
            package_naming_policy: PackageNamingPolicy::default(),
            number_of_assemblies: 0,
            bundled_assembly_name_width: 0,
            number_of_assembly_store_files: 0,
            mono_components: MonoComponent::empty(),
            environment: BTreeMap::new(),
            system_properties: BTreeMap::new(),
        }
    }
}

impl AppConfigOptions {
    /// Checks the values that the native record cannot be emitted without.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Error`] if the package name is empty, or if AOT is enabled
    /// without an AOT mode.
    pub fn validate(&self) -> Result<()> {
        if self.package_name.is_empty() {
            return Err(Error::Error(
                "Android package name must be set".to_string(),
            ));
        }
        if self.uses_mono_aot && !matches!(self.aot_mode.as_deref(), Some(mode) if !mode.is_empty()) {
            return Err(Error::Error(
                "Mono AOT enabled but no AOT mode specified".to_string(),
            ));
        }
        Ok(())
    }

    /// Merges parsed environment file entries into the environment table.
    ///
    /// Later entries override earlier ones. Setting
    /// [`BROKEN_EXCEPTION_TRANSITIONS_VAR`] to `true` also sets the matching flag.
    pub fn apply_environment(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in entries {
            if name == BROKEN_EXCEPTION_TRANSITIONS_VAR {
                self.broken_exception_transitions = value.eq_ignore_ascii_case("true");
            }
            self.environment.insert(name, value);
        }
    }
}

/// Parses an environment file.
///
/// Each non-empty line not starting with `#` holds `NAME=VALUE`. Whitespace around the name
/// is trimmed, the value is kept as written. Lines without `=` define the name with an empty
/// value.
///
/// # Errors
///
/// Returns [`crate::Error::Error`] naming `source` and the line number if a line has an
/// empty name.
pub fn parse_environment(text: &str, source: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (name, value) = trimmed.split_once('=').unwrap_or((trimmed, ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Error(format!(
                "{}:{}: environment entry without a name",
                source,
                number + 1
            )));
        }
        entries.push((name.to_string(), value.trim_end_matches('\r').to_string()));
    }
    Ok(entries)
}

/// Layout of the blob containers written for a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobWriterConfig {
    /// Base name of the generated files
    pub base_name: String,
    /// Directory the files are written to
    pub output_dir: PathBuf,
    /// Maximum number of assemblies per data shard; `None` writes a single shard
    pub max_assemblies_per_shard: Option<usize>,
    /// Architectures data shards are written for
    pub target_archs: Vec<TargetArch>,
}

impl Default for BlobWriterConfig {
    fn default() -> Self {
        BlobWriterConfig {
            base_name: "assemblies".to_string(),
            output_dir: PathBuf::from("."),
            max_assemblies_per_shard: None,
            target_archs: vec![TargetArch::Arm64],
        }
    }
}

/// Configuration of a complete build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Peer roots used by the scanner
    pub roots: PeerRoots,
    /// Always-registered entry points
    pub special_entry_points: Vec<SpecialEntryPoint>,
    /// Native entry point marker
    pub marshal_attribute: MarshalAttribute,
    /// Rewrite methods into native entry points
    pub marshal_methods: bool,
    /// Write rewritten modules back to their files
    pub write_modules: bool,
    /// Native application configuration
    pub app: AppConfigOptions,
    /// Blob container layout
    pub blob: BlobWriterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            roots: PeerRoots::default(),
            special_entry_points: SpecialEntryPoint::defaults(),
            marshal_attribute: MarshalAttribute::default(),
            marshal_methods: false,
            write_modules: false,
            app: AppConfigOptions::default(),
            blob: BlobWriterConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Debug builds: no method rewriting, debugger enabled, single blob shard.
    #[must_use]
    pub fn debug() -> Self {
        let mut config = PipelineConfig::default();
        config.app.mono_components = MonoComponent::DEBUGGER;
        config
    }

    /// Release builds: native entry point rewriting, blob containers with data shards.
    #[must_use]
    pub fn release() -> Self {
        let mut config = PipelineConfig {
            marshal_methods: true,
            write_modules: true,
            ..PipelineConfig::default()
        };
        config.app.have_assembly_store = true;
        config.app.jni_add_native_method_registration_attribute_present = true;
        config.blob.max_assemblies_per_shard = Some(64);
        config.blob.target_archs = vec![
            TargetArch::Arm,
            TargetArch::Arm64,
            TargetArch::X86,
            TargetArch::X86_64,
        ];
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let debug = PipelineConfig::debug();
        assert!(!debug.marshal_methods);
        assert!(debug.app.mono_components.contains(MonoComponent::DEBUGGER));

        let release = PipelineConfig::release();
        assert!(release.marshal_methods);
        assert!(release.app.have_assembly_store);
        assert_eq!(release.blob.target_archs.len(), 4);
        assert_eq!(release.special_entry_points.len(), 2);
    }

    #[test]
    fn validation() {
        let mut app = AppConfigOptions::default();
        assert!(app.validate().is_err());

        app.package_name = "com.example.app".to_string();
        assert!(app.validate().is_ok());

        app.uses_mono_aot = true;
        let err = app.validate().unwrap_err();
        assert!(err.to_string().contains("AOT mode"));

        app.aot_mode = Some("normal".to_string());
        assert!(app.validate().is_ok());
    }

    #[test]
    fn environment_file() {
        let text = "# debug settings\n\nMONO_LOG_LEVEL=info\r\nXA_BROKEN_EXCEPTION_TRANSITIONS=true\n  DEBUG_FLAG\nURL=a=b\n";
        let entries = parse_environment(text, "env.txt").unwrap();
        assert_eq!(
            entries,
            vec![
                ("MONO_LOG_LEVEL".to_string(), "info".to_string()),
                ("XA_BROKEN_EXCEPTION_TRANSITIONS".to_string(), "true".to_string()),
                ("DEBUG_FLAG".to_string(), String::new()),
                ("URL".to_string(), "a=b".to_string()),
            ]
        );

        let mut app = AppConfigOptions::default();
        app.apply_environment(entries);
        assert!(app.broken_exception_transitions);
        assert_eq!(
            app.environment.keys().collect::<Vec<_>>(),
            vec!["DEBUG_FLAG", "MONO_LOG_LEVEL", "URL", "XA_BROKEN_EXCEPTION_TRANSITIONS"]
        );
    }

    #[test]
    fn environment_file_rejects_empty_name() {
        let err = parse_environment("A=1\n=oops\n", "env.txt").unwrap_err();
        assert!(err.to_string().contains("env.txt:2"));
    }

    #[test]
    fn policy_names() {
        assert_eq!(
            "LowercaseCrc64".parse::<PackageNamingPolicy>().unwrap(),
            PackageNamingPolicy::LowercaseCrc64
        );
        assert_eq!(PackageNamingPolicy::LowercaseCrc64 as u32, 3);
        assert_eq!(BoundExceptionType::Java as u8, 1);
    }
}
