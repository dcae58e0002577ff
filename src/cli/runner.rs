//! Main runner: turns parsed arguments into a mirror run

use crate::cli::args::Args;
use crate::error::{MirrorError, Result};
use crate::logging::Logger;
use crate::mirror::{self, MappingSet, MirrorContext, MirrorReport, PlatformFilter};
use crate::registry::DefaultConnector;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Self { args, output }
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    /// Read every mapping source. Any invalid line or conflicting destination aborts
    /// before a connection is opened.
    pub async fn load_mappings(&self) -> Result<MappingSet> {
        let mut mappings = MappingSet::new();

        for filename in &self.args.filename {
            let contents = tokio::fs::read_to_string(filename).await.map_err(|e| {
                MirrorError::Configuration(format!("Failed to read mapping file {}: {}", filename, e))
            })?;
            let added = mappings.add_file_contents(filename, &contents)?;
            self.output
                .verbose(&format!("Loaded {} mappings from {}", added, filename));
        }

        for argument in &self.args.mappings {
            if !mappings.add_argument(argument)? {
                self.output
                    .verbose(&format!("Ignoring duplicate mapping {}", argument));
            }
        }

        if mappings.is_empty() {
            return Err(MirrorError::Configuration(
                "no mappings to mirror".to_string(),
            ));
        }
        Ok(mappings)
    }

    pub fn platform_filter(&self) -> Result<PlatformFilter> {
        match &self.args.filter_by_os {
            Some(pattern) => PlatformFilter::from_pattern(pattern),
            None => Ok(PlatformFilter::all()),
        }
    }

    /// Run the mirror until done or `cancel` fires. Configuration problems are
    /// returned as errors; per-mapping failures are carried in the report.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MirrorReport> {
        self.output.section("Registry Mirror");

        self.args.validate()?;
        let options = self.args.options()?;
        let filter = self.platform_filter()?;
        let mappings = self.load_mappings().await?;

        self.output.info(&format!("Mappings: {}", mappings.len()));
        if !filter.accepts_all() {
            self.output
                .info(&format!("Platform filter: {}", filter.description()));
        }
        if options.dry_run {
            self.output.info("Dry run: nothing will be copied");
        }

        let connector = DefaultConnector::new(
            self.args.auth_config()?,
            options.insecure,
            options.timeout,
            options.object_store.clone(),
            self.output.clone(),
        );
        let context = MirrorContext::new(
            Arc::new(connector),
            options,
            filter,
            self.output.clone(),
            cancel,
        );

        let report = mirror::run(&context, mappings.mappings()).await;

        if report.is_success() {
            self.output.success(&format!(
                "Mirrored {} references in {}",
                report.pushed.len(),
                self.output.format_duration(self.output.elapsed())
            ));
        } else {
            self.output.error(&format!(
                "{} of the requested copies failed",
                report.failures.len()
            ));
        }
        Ok(report)
    }
}
