//! The application configuration image.

use std::{collections::BTreeMap, path::Path};

use crate::{
    arch::TargetArch,
    config::AppConfigOptions,
    file::output::write_file,
    metadata::diagnostics::Diagnostics,
    native::{
        compressed::{self, CompressedAssemblyInfo},
        dso::{DsoCache, NativeLibrary},
        image::{NativeImage, NativeSymbol},
        layout::{
            EncodedData, FieldValue, StructLayout, APPLICATION_CONFIG, ASSEMBLY_STORE,
            ASSEMBLY_STORE_ASSEMBLY, BUNDLED_ASSEMBLY, DSO_CACHE_ENTRY,
        },
        target::NativeTarget,
    },
    utils::to_u32,
    Result,
};

/// Section holding the bundled assembly name buffers
pub const NAME_BUFFER_SECTION: &str = ".bss.bundled_assembly_names";

/// Output of [`NativeMetadataGenerator::generate`].
#[derive(Debug, Clone)]
pub struct NativeMetadata {
    /// The generated symbols
    pub image: NativeImage,
    /// The DSO cache the image contains
    pub dso_cache: DsoCache,
}

impl NativeMetadata {
    /// Renders the image and writes it to `path`.
    ///
    /// # Errors
    ///
    /// Returns the rendering error, or [`crate::Error::FileError`] if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_file(path, self.image.render()?.as_bytes())?;
        log::info!("wrote native metadata to '{}'", path.display());
        Ok(())
    }
}

/// Generates the native data the runtime loader reads at startup.
///
/// ```rust,no_run
/// use peerweave::prelude::*;
///
/// let mut options = AppConfigOptions::default();
/// options.package_name = "com.example.app".to_string();
///
/// let generator = NativeMetadataGenerator::new(TargetArch::Arm64)?;
/// let metadata = generator.generate(&options, &[], &[], &Diagnostics::new())?;
/// metadata.write_to("obj/environment.arm64-v8a.s")?;
/// # Ok::<(), peerweave::Error>(())
/// ```
pub struct NativeMetadataGenerator {
    target: NativeTarget,
}

/// Numbering of the local string and buffer labels.
struct Labels {
    strings: u32,
    buffers: u32,
}

impl Labels {
    fn string(&mut self, image: &mut NativeImage, value: &str) -> Result<String> {
        self.strings += 1;
        let label = format!(".L.env.str.{}", self.strings);
        image.push(NativeSymbol::string(label.as_str(), value))?;
        Ok(label)
    }

    fn buffer(&mut self, image: &mut NativeImage, size: u64) -> Result<String> {
        self.buffers += 1;
        let label = format!(".L.env.buf.{}", self.buffers);
        image.push(NativeSymbol::zeroed(label.as_str(), NAME_BUFFER_SECTION, size, 1))?;
        Ok(label)
    }
}

impl NativeMetadataGenerator {
    /// Generator for `arch`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] for [`TargetArch::None`].
    pub fn new(arch: TargetArch) -> Result<Self> {
        Ok(NativeMetadataGenerator {
            target: NativeTarget::for_arch(arch)?,
        })
    }

    /// Target the generator emits for
    #[must_use]
    pub fn target(&self) -> &NativeTarget {
        &self.target
    }

    /// Generates every symbol of the configuration image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Error`] if `options` fail validation, and the errors of the
    /// DSO cache construction and of the layout.
    pub fn generate(
        &self,
        options: &AppConfigOptions,
        libraries: &[NativeLibrary],
        compressed_assemblies: &[CompressedAssemblyInfo],
        diagnostics: &Diagnostics,
    ) -> Result<NativeMetadata> {
        options.validate()?;

        let target = self.target;
        let mut image = NativeImage::new(target);
        let mut labels = Labels {
            strings: 0,
            buffers: 0,
        };

        let aot_mode = labels.string(&mut image, options.aot_mode.as_deref().unwrap_or(""))?;
        let mut pointer = EncodedData::default();
        pointer.push_pointer(&target, Some(&aot_mode), "mono_aot_mode_name");
        image.push(NativeSymbol::data("mono_aot_mode_name", pointer, &target))?;

        self.emit_name_value_array(&mut image, &mut labels, "app_environment_variables", &options.environment)?;
        self.emit_name_value_array(&mut image, &mut labels, "app_system_properties", &options.system_properties)?;

        self.emit_bundled_assemblies(&mut image, &mut labels, options)?;
        self.emit_assembly_stores(&mut image, options)?;

        let dso_cache = DsoCache::build(libraries, target.pointer_width(), diagnostics)?;
        self.emit_dso_cache(&mut image, &dso_cache)?;

        compressed::emit(&mut image, compressed_assemblies)?;

        let package_name = labels.string(&mut image, &options.package_name)?;
        let config = StructLayout::new("ApplicationConfig", APPLICATION_CONFIG, &target);
        let values = [
            FieldValue::Bool(options.uses_mono_llvm),
            FieldValue::Bool(options.uses_mono_aot),
            FieldValue::Bool(options.uses_assembly_preload),
            FieldValue::Bool(options.is_a_bundled_app),
            FieldValue::Bool(options.broken_exception_transitions),
            FieldValue::Bool(options.instant_run_enabled),
            FieldValue::Bool(options.jni_add_native_method_registration_attribute_present),
            FieldValue::Bool(options.have_runtime_config_blob),
            FieldValue::Bool(options.have_assembly_store),
            FieldValue::Unsigned(options.bound_exception_type as u64),
            FieldValue::Unsigned(options.package_naming_policy as u64),
            FieldValue::Unsigned(u64::from(to_u32(options.environment.len() * 2)?)),
            FieldValue::Unsigned(u64::from(to_u32(options.system_properties.len() * 2)?)),
            FieldValue::Unsigned(u64::from(options.number_of_assemblies)),
            FieldValue::Unsigned(u64::from(options.bundled_assembly_name_width)),
            FieldValue::Unsigned(u64::from(options.number_of_assembly_store_files)),
            FieldValue::Unsigned(u64::from(to_u32(dso_cache.len())?)),
            FieldValue::Unsigned(u64::from(options.mono_components.bits())),
            FieldValue::symbol(package_name),
            FieldValue::symbol("app_environment_variables"),
            FieldValue::symbol("app_system_properties"),
            FieldValue::symbol("bundled_assemblies"),
            FieldValue::symbol("assembly_store_bundled_assemblies"),
            FieldValue::symbol("assembly_stores"),
            FieldValue::symbol("dso_cache"),
        ];
        let mut data = EncodedData::default();
        data.push(&config, &values, "application_config")?;
        image.push(NativeSymbol::data("application_config", data, &target))?;

        log::info!(
            "native metadata for {}: {} symbols, {} DSO cache entries",
            target.arch,
            image.symbols().len(),
            dso_cache.len()
        );
        Ok(NativeMetadata { image, dso_cache })
    }

    /// Emits the strings of `entries` and an array of (name, value) pointer pairs.
    fn emit_name_value_array(
        &self,
        image: &mut NativeImage,
        labels: &mut Labels,
        symbol: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut pairs = Vec::with_capacity(entries.len() * 2);
        for (name, value) in entries {
            pairs.push((labels.string(image, name)?, format!("{symbol}: {name}")));
            pairs.push((labels.string(image, value)?, format!("{symbol}: {name} value")));
        }

        let mut data = EncodedData::default();
        for (label, comment) in &pairs {
            data.push_pointer(&self.target, Some(label), comment);
        }
        image.push(NativeSymbol::data(symbol, data, &self.target))
    }

    /// Emits the name buffers and descriptors of individually packaged assemblies.
    fn emit_bundled_assemblies(
        &self,
        image: &mut NativeImage,
        labels: &mut Labels,
        options: &AppConfigOptions,
    ) -> Result<()> {
        let layout = StructLayout::new("BundledAssembly", BUNDLED_ASSEMBLY, &self.target);
        let mut data = EncodedData::default();

        if !options.have_assembly_store {
            let width = u64::from(options.bundled_assembly_name_width);
            let mut buffers = Vec::with_capacity(options.number_of_assemblies as usize);
            for _ in 0..options.number_of_assemblies {
                buffers.push(labels.buffer(image, width)?);
            }

            for (index, buffer) in buffers.into_iter().enumerate() {
                data.push(
                    &layout,
                    &[
                        FieldValue::Signed(-1),
                        FieldValue::Unsigned(0),
                        FieldValue::Unsigned(0),
                        FieldValue::null(),
                        FieldValue::Unsigned(0),
                        FieldValue::symbol(buffer),
                    ],
                    &format!("bundled_assemblies[{index}]"),
                )?;
            }
        }

        image.push(NativeSymbol::data("bundled_assemblies", data, &self.target))
    }

    /// Emits the runtime descriptors filled in by the loader from the blob index.
    fn emit_assembly_stores(&self, image: &mut NativeImage, options: &AppConfigOptions) -> Result<()> {
        let assembly_layout =
            StructLayout::new("AssemblyStoreSingleAssemblyRuntimeData", ASSEMBLY_STORE_ASSEMBLY, &self.target);
        let store_layout = StructLayout::new("AssemblyStoreRuntimeData", ASSEMBLY_STORE, &self.target);

        let mut assemblies = EncodedData::default();
        let mut stores = EncodedData::default();

        if options.have_assembly_store {
            for index in 0..options.number_of_assemblies {
                assemblies.push(
                    &assembly_layout,
                    &[FieldValue::null(), FieldValue::null(), FieldValue::null(), FieldValue::null()],
                    &format!("assembly_store_bundled_assemblies[{index}]"),
                )?;
            }
            for index in 0..options.number_of_assembly_store_files {
                stores.push(
                    &store_layout,
                    &[FieldValue::null(), FieldValue::Unsigned(0), FieldValue::null()],
                    &format!("assembly_stores[{index}]"),
                )?;
            }
        }

        image.push(NativeSymbol::data("assembly_store_bundled_assemblies", assemblies, &self.target))?;
        image.push(NativeSymbol::data("assembly_stores", stores, &self.target))
    }

    fn emit_dso_cache(&self, image: &mut NativeImage, cache: &DsoCache) -> Result<()> {
        for dso in &cache.names {
            image.push(NativeSymbol::string(dso.label.as_str(), dso.name.as_str()))?;
        }

        let layout = StructLayout::new("DSOCacheEntry", DSO_CACHE_ENTRY, &self.target);
        let mut data = EncodedData::default();
        for (index, entry) in cache.entries.iter().enumerate() {
            let name = &cache.names[entry.name_index];
            data.push(
                &layout,
                &[
                    FieldValue::Unsigned(entry.hash),
                    FieldValue::Bool(entry.ignore),
                    FieldValue::symbol(name.label.as_str()),
                    FieldValue::null(),
                ],
                &format!("dso_cache[{index}] ('{}')", entry.mutation),
            )?;
        }
        image.push(NativeSymbol::data("dso_cache", data, &self.target))
    }
}
