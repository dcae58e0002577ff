//! Command-line argument parsing

use crate::cli::config::{
    AuthConfig, ConcurrencyLimits, MirrorOptions, ObjectStoreConfig, S3SourceLocation,
};
use crate::error::{MirrorError, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "registry-mirror")]
#[command(about = "Mirror container images between registries and S3 buckets")]
#[command(version, author)]
pub struct Args {
    /// Mappings of the form SRC=DST
    #[arg(value_name = "MAPPINGS", help = "Image mappings SRC=DST; prefix DST with s3:// for a bucket")]
    pub mappings: Vec<String>,

    /// File with one mapping per line
    #[arg(
        long = "filename",
        short = 'f',
        help = "Read mappings from a file (SRC DST or SRC=DST per line, # for comments)"
    )]
    pub filename: Vec<String>,

    /// Platform filter for manifest lists
    #[arg(
        long = "filter-by-os",
        help = "Regular expression matched against os/arch[/variant] of manifest list entries"
    )]
    pub filter_by_os: Option<String>,

    #[arg(long = "skip-mount", help = "Always upload blobs instead of mounting them")]
    pub skip_mount: bool,

    #[arg(long = "force", help = "Copy content even if the destination already has it")]
    pub force: bool,

    #[arg(
        long = "dry-run",
        short = 'n',
        help = "Print the plan without copying anything"
    )]
    pub dry_run: bool,

    #[arg(
        long = "skip-missing",
        help = "Skip source tags that do not exist instead of failing"
    )]
    pub skip_missing: bool,

    #[arg(
        long = "insecure",
        help = "Use plain HTTP and accept invalid certificates"
    )]
    pub insecure: bool,

    #[arg(
        long = "max-registry",
        default_value = "4",
        help = "Number of source repositories processed concurrently"
    )]
    pub max_registry: usize,

    #[arg(
        long = "max-per-registry",
        default_value = "6",
        help = "Number of concurrent blob operations per destination registry"
    )]
    pub max_per_registry: usize,

    /// Buckets that may already hold blobs
    #[arg(
        long = "s3-source-bucket",
        help = "bucket/prefix to server-side copy blobs from; append [store] for the registry storage layout"
    )]
    pub s3_source_bucket: Vec<String>,

    #[arg(long = "s3-region", help = "Default region for S3 destinations")]
    pub s3_region: Option<String>,

    #[arg(
        long = "s3-endpoint",
        help = "Custom S3 endpoint URL (MinIO, Ceph, LocalStack)"
    )]
    pub s3_endpoint: Option<String>,

    #[arg(long = "s3-path-style", help = "Use path-style S3 addressing")]
    pub s3_path_style: bool,

    #[arg(
        long = "username",
        short = 'u',
        help = "Username for registry authentication"
    )]
    pub username: Option<String>,

    #[arg(
        long = "password",
        short = 'p',
        help = "Password for registry authentication"
    )]
    pub password: Option<String>,

    #[arg(
        long = "timeout",
        short = 't',
        default_value = "300",
        help = "Timeout for network operations in seconds"
    )]
    pub timeout: u64,

    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        help = "Only print pushed references and errors"
    )]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        if self.mappings.is_empty() && self.filename.is_empty() {
            return Err(MirrorError::Configuration(
                "at least one mapping or --filename is required".to_string(),
            ));
        }
        if self.verbose && self.quiet {
            return Err(MirrorError::Configuration(
                "--verbose and --quiet cannot be combined".to_string(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(MirrorError::Configuration(
                "--username and --password must be given together".to_string(),
            ));
        }
        self.options()?.validate()
    }

    pub fn auth_config(&self) -> Result<Option<AuthConfig>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                let auth = AuthConfig::new(username.clone(), password.clone());
                auth.validate()?;
                Ok(Some(auth))
            }
            _ => Ok(None),
        }
    }

    /// Engine options derived from the flags
    pub fn options(&self) -> Result<MirrorOptions> {
        let s3_sources = self
            .s3_source_bucket
            .iter()
            .map(|location| S3SourceLocation::parse(location))
            .collect::<Result<Vec<_>>>()?;

        Ok(MirrorOptions {
            skip_mount: self.skip_mount,
            force: self.force,
            dry_run: self.dry_run,
            skip_missing: self.skip_missing,
            insecure: self.insecure,
            timeout: self.timeout,
            limits: ConcurrencyLimits {
                max_registry: self.max_registry,
                max_per_registry: self.max_per_registry,
            },
            s3_sources,
            object_store: ObjectStoreConfig {
                region: self.s3_region.clone(),
                endpoint: self.s3_endpoint.clone(),
                force_path_style: self.s3_path_style,
                timeout_seconds: self.timeout,
            },
        })
    }

    /// Print usage examples
    pub fn print_examples() {
        println!("Examples:");
        println!("  # Copy one tag to another registry");
        println!("  registry-mirror registry.example/foo:latest=mirror.example/foo:stable");
        println!();
        println!("  # Keep only linux/amd64 from multi-platform images");
        println!("  registry-mirror --filter-by-os linux/amd64 quay.io/org/app:v1=mirror.example/app:v1");
        println!();
        println!("  # Mirror into an S3 bucket, copying blobs from an existing registry bucket");
        println!("  registry-mirror --s3-source-bucket registry-bucket/docker/registry/v2/blobs[store] \\");
        println!("                  quay.io/org/app:v1=s3://s3.amazonaws.com/us-east-1/mirror-bucket/app");
        println!();
        println!("  # Read mappings from a file and only show the plan");
        println!("  registry-mirror -f mappings.txt --dry-run --verbose");
    }

    /// Load configuration from environment variables
    pub fn from_env(mut self) -> Self {
        if self.username.is_none() {
            self.username = std::env::var("REGISTRY_MIRROR_USERNAME").ok();
        }

        if self.password.is_none() {
            self.password = std::env::var("REGISTRY_MIRROR_PASSWORD").ok();
        }

        if std::env::var("REGISTRY_MIRROR_VERBOSE").is_ok() {
            self.verbose = true;
        }

        if std::env::var("REGISTRY_MIRROR_INSECURE").is_ok() {
            self.insecure = true;
        }

        self
    }
}
