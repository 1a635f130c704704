//! CLI runner - executes commands

use crate::batch::{BatchBuilder, BatchEvent};
use crate::catalog::{discover_catalog, resolve_catalog, Catalog};
use crate::cli::commands::{Cli, Commands};
use crate::config::{DeliveryLimits, ExtractConfig, LoadConfig};
use crate::database::DuckDbSource;
use crate::delivery::{DeliveryEngine, DeliveryOutcome};
use crate::destination::AggregationKeyFilter;
use crate::engine::{SyncConfig, SyncEngine};
use crate::error::{Error, Result};
use crate::protocol::{parse_message, MessageWriter};
use crate::state::{build_state, State};
use crate::types::JsonValue;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Extract {
                config,
                state,
                catalog,
                discover,
                limit,
            } => {
                self.extract(config, state.as_deref(), catalog.as_deref(), *discover, *limit)
                    .await
            }
            Commands::Load {
                config,
                batch_bytes,
                batch_records,
                request_delay,
                rate_limit,
                attempts,
            } => {
                let mut limits = DeliveryLimits::default();
                if let Some(bytes) = batch_bytes {
                    limits = limits.with_max_bytes(*bytes);
                }
                if let Some(records) = batch_records {
                    limits = limits.with_max_records(*records);
                }
                if let Some(delay) = request_delay {
                    let delay = Duration::try_from_secs_f64(*delay).map_err(|e| {
                        Error::InvalidConfigValue {
                            field: "request_delay".to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    limits = limits.with_request_delay(delay);
                }
                if let Some(in_flight) = rate_limit {
                    limits = limits.with_max_concurrent(*in_flight);
                }
                if let Some(attempts) = attempts {
                    limits = limits.with_max_attempts(*attempts);
                }
                self.load(config, limits).await
            }
        }
    }

    /// Discover, then either print the catalog or sync the selected streams
    async fn extract(
        &self,
        config_path: &Path,
        state_path: Option<&Path>,
        catalog_path: Option<&Path>,
        discover: bool,
        limit: Option<u64>,
    ) -> Result<()> {
        let config = ExtractConfig::from_file(config_path)?.with_limit(limit);
        let db = DuckDbSource::connect(&config)?;

        let selected: BTreeSet<String> = config.streams.keys().cloned().collect();
        let discovered = discover_catalog(&db, &config.dbname, &config.schema, &selected)?;
        if discover {
            println!("{}", serde_json::to_string_pretty(&discovered)?);
            return Ok(());
        }

        let user_catalog = match catalog_path {
            Some(path) => Catalog::from_file(path)?,
            None => {
                debug!("No catalog given, using the discovered catalog");
                discovered.clone()
            }
        };
        let prior = match state_path {
            Some(path) => State::from_file(path)?,
            None => State::new(),
        };

        let catalog = resolve_catalog(&discovered, &user_catalog, &prior);
        let state = build_state(&prior, &catalog);

        let key_filter = AggregationKeyFilter::new(
            config.aggregation_url(),
            &config.target_integration_key,
            Duration::from_secs(300),
        )?;
        let mut engine = SyncEngine::new(&db).with_config(SyncConfig::from_extract(&config)?);
        if !config.streams.is_empty() {
            engine = engine.with_key_filter(&key_filter);
        }

        let mut writer = MessageWriter::stdout();
        engine.sync(&catalog, state, &mut writer).await?;

        let stats = engine.stats();
        info!(
            records = stats.records_synced,
            streams = stats.streams_synced,
            skipped = stats.streams_skipped,
            "Extract finished"
        );
        Ok(())
    }

    /// Deliver stdin to the destination
    async fn load(&self, config_path: &Path, limits: DeliveryLimits) -> Result<()> {
        let config = LoadConfig::from_file(config_path)?;
        let builder = BatchBuilder::new(config.clone(), limits.clone());
        let engine = DeliveryEngine::new(config, &limits)?;

        let mut pipeline = LoadPipeline::new(builder, engine, std::io::stdout());
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let outcome = pipeline.run(input).await?;

        let updated: u64 = outcome.streams.iter().map(|s| s.updated).sum();
        info!(
            streams = outcome.streams.len(),
            updated,
            "Load finished"
        );
        Ok(())
    }
}

/// Drives messages from an input through batching and delivery.
///
/// STATE values are echoed to `out` as they arrive, and the latest one is
/// echoed again each time a stream closes out and before a fatal error is
/// returned.
pub struct LoadPipeline<W: Write> {
    builder: BatchBuilder,
    engine: DeliveryEngine,
    out: W,
    latest_state: Option<JsonValue>,
    outcome: DeliveryOutcome,
}

impl<W: Write> LoadPipeline<W> {
    /// Create a pipeline
    pub fn new(builder: BatchBuilder, engine: DeliveryEngine, out: W) -> Self {
        Self {
            builder,
            engine,
            out,
            latest_state: None,
            outcome: DeliveryOutcome::default(),
        }
    }

    /// Consume the whole input.
    ///
    /// Succeeds only if every configured stream was closed out.
    pub async fn run<R>(&mut self, input: R) -> Result<DeliveryOutcome>
    where
        R: AsyncBufRead + Unpin,
    {
        if let Err(e) = self.consume(input).await {
            error!(error = %e, "Load failed");
            self.engine.abort_all();
            // the load error takes precedence over a failed flush
            let _ = self.echo_latest_state();
            return Err(e);
        }

        let tracker = self.engine.tracker();
        if !tracker.is_complete() {
            let missing = tracker.missing();
            error!(missing = ?missing, "Input ended before every stream was delivered");
            let _ = self.echo_latest_state();
            return Err(Error::IncompleteRun { missing });
        }

        self.outcome.complete = true;
        Ok(std::mem::take(&mut self.outcome))
    }

    /// Take back the output writer
    pub fn into_output(self) -> W {
        self.out
    }

    async fn consume<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message = parse_message(&line)?;
            for event in self.builder.handle(message)? {
                self.apply(event).await?;
            }
        }

        debug!("End of input");
        for event in self.builder.finish() {
            self.apply(event).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, event: BatchEvent) -> Result<()> {
        match event {
            BatchEvent::Flush(batch) => self.engine.dispatch(batch).await,
            BatchEvent::State(value) => {
                self.write_state(&value)?;
                self.latest_state = Some(value);
                Ok(())
            }
            BatchEvent::StreamClosed {
                stream,
                records,
                batches,
            } => {
                debug!(stream = %stream, records, batches, "Closing stream");
                let stats = self.engine.close_stream(&stream).await?;
                if stats.terminal_failures > 0 {
                    warn!(
                        stream = %stream,
                        records = stats.terminal_failures,
                        "Records rejected after retry"
                    );
                }
                self.outcome.streams.push(stats);
                self.echo_latest_state()
            }
        }
    }

    fn echo_latest_state(&mut self) -> Result<()> {
        match self.latest_state.take() {
            Some(value) => {
                let result = self.write_state(&value);
                self.latest_state = Some(value);
                result
            }
            None => Ok(()),
        }
    }

    fn write_state(&mut self, value: &JsonValue) -> Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
