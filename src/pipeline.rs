//! The managed side of a build: scan, classify and rewrite.
//!
//! [`BuildPipeline::run`] drives the stages in order and stops at the first fatal error. The
//! native side ([`crate::native::NativeMetadataGenerator`]) and packaging
//! ([`crate::blob::BlobWriter`]) consume its output and are invoked by the caller, once per
//! target architecture.

use std::time::Instant;

use crate::{
    classifier::{MethodClassifier, Registrations},
    config::PipelineConfig,
    metadata::{diagnostics::Diagnostics, module::ModuleDefinition},
    rewriter::{write_modules, NativeEntryPoint, SignatureRewriter},
    scanner::{ManagedType, TypeScanner},
    Result,
};

/// Everything the managed stages produce.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Classified peer types, sorted by key
    pub types: Vec<ManagedType>,
    /// Registration tables of every peer type
    pub registrations: Registrations,
    /// Native entry points; empty when method rewriting is disabled
    pub native_entry_points: Vec<NativeEntryPoint>,
    /// Non-fatal findings of all stages
    pub diagnostics: Diagnostics,
}

/// Runs the managed build stages.
pub struct BuildPipeline;

impl BuildPipeline {
    /// Scans `modules`, classifies the methods of their peer types and, if enabled, rewrites
    /// callbacks into native entry points.
    ///
    /// `attribute_provider` is the module defining the native entry point marker; it is only
    /// consulted when `config.marshal_methods` is set. With `config.write_modules` the
    /// rewritten modules replace their files together.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any stage: classification conflicts from the scanner,
    /// unsupported signatures from the classifier, and missing marker constructors or write
    /// failures from the rewriter.
    pub fn run(
        modules: &mut [ModuleDefinition],
        attribute_provider: &ModuleDefinition,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput> {
        let start = Instant::now();
        let diagnostics = Diagnostics::new();

        let types = TypeScanner::new(config.roots.clone()).scan(modules)?;

        let mut registrations = {
            let mut classifier =
                MethodClassifier::new(modules, config.special_entry_points.clone(), &diagnostics);
            classifier.classify(&types)?;
            classifier.add_special_case_methods()?;
            classifier.finish()
        };

        let native_entry_points = if config.marshal_methods {
            let rewriter = SignatureRewriter::new(&config.marshal_attribute, &diagnostics);
            let entry_points = rewriter.rewrite(modules, attribute_provider, &mut registrations)?;

            if config.write_modules {
                let touched: Vec<&ModuleDefinition> = modules
                    .iter()
                    .filter(|module| entry_points.iter().any(|e| e.module == module.display_name()))
                    .collect();
                let written = write_modules(touched)?;
                log::info!("wrote {} rewritten module(s)", written.len());
            }
            entry_points
        } else {
            log::debug!("method rewriting disabled; callbacks stay dynamically registered");
            Vec::new()
        };

        log::info!(
            "managed build stages finished in {:?}: {} type(s), {} native entry point(s), {} diagnostic(s)",
            start.elapsed(),
            types.len(),
            native_entry_points.len(),
            diagnostics.count()
        );

        Ok(PipelineOutput {
            types,
            registrations,
            native_entry_points,
            diagnostics,
        })
    }
}
