//! Shared setup for the `medialib` binary.

use anyhow::Context;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;

use medialib_core::{extension_of, AppError, Config, ErrorMetadata, LibraryConfig, LogLevel};
use medialib_services::{
    CloudConvertClient, ConversionService, DiskRegistry, JobExecutorConfig, MediaLibrary, Stores,
    TransformerRegistry, UrlGeneratorRegistry,
};

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("medialib=info")),
        )
        .init();
}

/// MIME type of an upload: sniffed from the content, else looked up by the
/// file's extension in the configured tables.
pub fn detect_mime(data: &[u8], path: &Path, library: &LibraryConfig) -> Option<String> {
    if let Some(kind) = infer::get(data) {
        return Some(kind.mime_type().to_string());
    }
    let name = path.file_name()?.to_string_lossy();
    library
        .mime_for_extension(&extension_of(&name))
        .map(str::to_string)
}

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// A library backed by PostgreSQL and the configured disks.
pub struct Runtime {
    pub config: Config,
    pub pool: PgPool,
    pub library: Arc<MediaLibrary>,
}

impl Runtime {
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let pool = medialib_db::connect(&config).await?;

        let library_config = config.load_library()?;
        library_config.validate()?;

        let disks = DiskRegistry::from_config(&library_config, &UrlGeneratorRegistry::default())
            .await
            .context("Failed to configure disks")?;
        let conversion = CloudConvertClient::from_config(&config)?
            .map(|client| Arc::new(client) as Arc<dyn ConversionService>);
        if conversion.is_none() {
            tracing::warn!("CLOUDCONVERT_API_KEY not set, document and video transformations will fail");
        }

        let library = MediaLibrary::builder(library_config, disks, Stores::postgres(pool.clone()))
            .transformers(TransformerRegistry::with_defaults(conversion))
            .executor_config(JobExecutorConfig::from_config(&config))
            .build();

        Ok(Self {
            config,
            pool,
            library,
        })
    }
}

/// One-line message for a failed command. Library errors print their
/// client message and code; anything else prints the full context chain.
pub fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AppError>() {
        Some(app) => {
            match app.log_level() {
                LogLevel::Error => tracing::error!(error = %app, code = app.error_code(), "Command failed"),
                LogLevel::Warn => tracing::warn!(error = %app, code = app.error_code(), "Command failed"),
                LogLevel::Debug => tracing::debug!(error = %app, code = app.error_code(), "Command failed"),
            }
            format!("{} ({})", app.client_message(), app.error_code())
        }
        None => format!("{:#}", err),
    }
}
