//! Command execution.

use crate::commands::Commands;
use crate::fs_source::FsContentAccessor;
use crate::output;
use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use lantern_core::{AppConfig, ScanEvent, ScanEventType, ScanId, ScanTotals, SpaceKey};
use lantern_db::{CheckpointStore, Database, EventStore};
use lantern_detect::HttpDetector;
use lantern_scanner::{ContentAccessor, ScanOrchestrator, SpaceCatalog, SpaceSelection};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long a watcher may take to drain after the scan completed.
const WATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options of the `scan` command.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Root of the content tree
    pub root: PathBuf,
    /// Scan to run or resume
    pub scan_id: Option<String>,
    /// Explicit space keys
    pub spaces: Vec<String>,
    /// Only stale spaces
    pub stale: bool,
    /// Purge everything first
    pub fresh: bool,
    /// Fan-out override
    pub max_concurrent: Option<usize>,
    /// Print live events
    pub watch: bool,
}

/// Opened database plus settings, shared by all commands.
pub struct App {
    config: AppConfig,
    db: Database,
}

impl App {
    /// Open the configured database and bring its schema up to date.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let path = config
            .database_path()
            .context("could not resolve database path")?;
        let db = Database::new(&path)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        db.run_migrations().await.context("failed to run migrations")?;
        info!("Using database {}", path.display());
        Ok(Self { config, db })
    }

    /// Wrap an already opened database.
    pub fn with_database(config: AppConfig, db: Database) -> Self {
        Self { config, db }
    }

    /// Close the database pool.
    pub async fn close(self) {
        self.db.close().await;
    }

    fn checkpoints(&self) -> Arc<dyn CheckpointStore> {
        Arc::new(self.db.checkpoint_store())
    }

    fn events(&self) -> Arc<dyn EventStore> {
        Arc::new(self.db.event_store())
    }

    /// Run one command.
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Scan {
                root,
                scan_id,
                spaces,
                stale,
                fresh,
                max_concurrent,
                watch,
            } => {
                let report = self
                    .scan(ScanOptions {
                        root,
                        scan_id,
                        spaces,
                        stale,
                        fresh,
                        max_concurrent,
                        watch,
                    })
                    .await?;
                print!("{report}");
            }
            Commands::Events {
                scan_id,
                space,
                after,
            } => {
                for event in self.events_for_space(&scan_id, &space, after).await? {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Commands::Checkpoints { scan_id } => {
                let scan_id = ScanId::new(scan_id)?;
                let checkpoints = self.checkpoints().find_by_scan(&scan_id).await?;
                if checkpoints.is_empty() {
                    println!("no checkpoints for scan {scan_id}");
                }
                for checkpoint in &checkpoints {
                    println!("{}", output::render_checkpoint(checkpoint));
                }
            }
            Commands::Summary { scan_id, space } => {
                let totals = self.summary(&scan_id, &space).await?;
                print!("{}", output::render_totals(&totals));
            }
            Commands::Spaces { root } => {
                let catalog = SpaceCatalog::new(
                    Arc::new(FsContentAccessor::new(root)),
                    self.checkpoints(),
                    self.config.scanning.staleness_days,
                );
                catalog.refresh().await?;
                for status in catalog.snapshot().await.iter() {
                    println!("{}", output::render_space_status(status));
                }
            }
            Commands::Reset => {
                let deleted = self.checkpoints().delete_active_scan_checkpoints().await?;
                println!("deleted {deleted} active checkpoint(s)");
            }
            Commands::Purge { scan_id, yes } => {
                if !yes {
                    bail!("refusing to purge without --yes");
                }
                let (checkpoints, events) = self.purge(scan_id.as_deref()).await?;
                println!("deleted {checkpoints} checkpoint(s) and {events} event(s)");
            }
        }
        Ok(())
    }

    /// Run or resume a scan and return the rendered report.
    pub async fn scan(&self, options: ScanOptions) -> Result<String> {
        let content = Arc::new(FsContentAccessor::new(&options.root));
        let detector = Arc::new(
            HttpDetector::from_config(&self.config.detector).context("invalid detector settings")?,
        );

        let mut orchestrator = ScanOrchestrator::new(
            content.clone(),
            detector,
            self.checkpoints(),
            self.events(),
            &self.config,
        );
        if let Some(max) = options.max_concurrent {
            orchestrator = orchestrator.with_max_concurrent_spaces(max);
        }
        let orchestrator = Arc::new(orchestrator);

        if options.fresh {
            orchestrator.purge_all().await?;
        }
        let scan_id = match options.scan_id {
            Some(id) => ScanId::new(id)?,
            None => ScanId::generate(),
        };

        let keys = self.select_spaces(&content, &options.spaces, options.stale).await?;
        if keys.is_empty() {
            info!("Nothing to scan");
            return Ok(format!("scan {scan_id}: nothing to scan\n"));
        }

        let watcher = options.watch.then(|| {
            let subscriptions: Vec<_> = keys
                .iter()
                .map(|key| orchestrator.subscribe(&scan_id, key, 0))
                .collect();
            tokio::spawn(print_live_events(subscriptions))
        });

        let mut handle = orchestrator.spawn_scan(scan_id.clone(), SpaceSelection::Keys(keys.clone()));
        let joined = tokio::select! {
            joined = &mut handle => joined,
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        warn!("Interrupted, pausing running spaces");
                        for key in &keys {
                            orchestrator.pause_space(&scan_id, key);
                        }
                    }
                    Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
                }
                (&mut handle).await
            }
        };
        let report = joined.context("scan task panicked")??;

        if let Some(watcher) = watcher {
            if report.completed {
                if tokio::time::timeout(WATCH_DRAIN_TIMEOUT, watcher).await.is_err() {
                    warn!("Live event stream did not finish draining");
                }
            } else {
                watcher.abort();
            }
        }

        Ok(output::render_report(&report))
    }

    async fn select_spaces(
        &self,
        content: &Arc<FsContentAccessor>,
        spaces: &[String],
        stale: bool,
    ) -> Result<Vec<SpaceKey>> {
        if stale {
            let catalog = SpaceCatalog::new(
                content.clone(),
                self.checkpoints(),
                self.config.scanning.staleness_days,
            );
            catalog.refresh().await?;
            return Ok(catalog.stale_spaces().await);
        }
        if spaces.is_empty() {
            return Ok(content
                .get_all_spaces()
                .await
                .context("failed to list spaces")?
                .into_iter()
                .map(|space| space.key)
                .collect());
        }
        spaces
            .iter()
            .map(|key| SpaceKey::new(key.as_str()).map_err(Into::into))
            .collect()
    }

    /// Persisted events of a space after `after`, in sequence order.
    pub async fn events_for_space(&self, scan_id: &str, space: &str, after: u64) -> Result<Vec<ScanEvent>> {
        let scan_id = ScanId::new(scan_id)?;
        let space = SpaceKey::new(space)?;
        Ok(self
            .events()
            .stream_by_scan_and_space(&scan_id, &space, after)
            .try_collect()
            .await?)
    }

    /// Totals of a space folded from its events.
    pub async fn summary(&self, scan_id: &str, space: &str) -> Result<ScanTotals> {
        let mut totals = ScanTotals::default();
        for event in self.events_for_space(scan_id, space, 0).await? {
            totals.absorb(&event);
        }
        Ok(totals)
    }

    /// Delete one scan's state, or everything. Returns (checkpoints, events).
    pub async fn purge(&self, scan_id: Option<&str>) -> Result<(u64, u64)> {
        let checkpoints = self.checkpoints();
        let events = self.events();
        match scan_id {
            Some(id) => {
                let scan_id = ScanId::new(id)?;
                Ok((
                    checkpoints.delete_by_scan(&scan_id).await?,
                    events.delete_by_scan(&scan_id).await?,
                ))
            }
            None => Ok((checkpoints.delete_all().await?, events.delete_all().await?)),
        }
    }
}

/// Print events of every subscription as JSON lines.
///
/// Each space subscription also carries the scan-level completion event;
/// it is printed once.
async fn print_live_events(subscriptions: Vec<lantern_scanner::EventSubscription>) {
    let mut merged = stream::select_all(subscriptions);
    let mut completion_printed = false;

    while let Some(event) = merged.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Live event stream failed: {}", e);
                continue;
            }
        };
        if event.event_type == ScanEventType::ScanCompleted {
            if completion_printed {
                continue;
            }
            completion_printed = true;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode event {}: {}", event.sequence, e),
        }
    }
}
