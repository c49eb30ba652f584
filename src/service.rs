//! Org-scoped entry points shared by the MCP tools and the CLI.
//!
//! Every operation takes the caller's raw org identifier and validates it
//! before touching the store; a missing org is rejected, never defaulted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::audit::{MetricsSink, TracingSink};
use crate::builder::{GraphBuilder, IngestReport, RebuildReport};
use crate::cache::{CacheStats, SubgraphCache};
use crate::config::ChronicleConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::Result;
use crate::graph::stats::{graph_stats, GraphStats};
use crate::graph::store::GraphStore;
use crate::graph::types::{ArtifactRecord, OrgId};
use crate::narrator::breaker::BreakerState;
use crate::narrator::NarratorAdapter;
use crate::reasoner::{Explanation, Neighborhood, TemporalReasoner, TimelineResult};

/// Outcome of [`GraphService::ingest_and_rebuild`].
#[derive(Debug, Serialize)]
pub struct IngestAndRebuild {
    pub ingest: IngestReport,
    pub rebuild: RebuildReport,
}

/// Process-level status for `doctor` and the MCP server info.
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub embedding_model: String,
    pub narrator_breaker: BreakerState,
    pub cache: CacheStats,
}

pub struct GraphService {
    store: Arc<GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    builder: GraphBuilder,
    reasoner: TemporalReasoner,
    cache: Arc<SubgraphCache>,
    config: Arc<ChronicleConfig>,
    shutdown: CancellationToken,
}

impl GraphService {
    /// Open the configured database and providers.
    pub fn open(config: ChronicleConfig) -> anyhow::Result<Self> {
        let db_path = config.resolved_db_path();
        let store = Arc::new(GraphStore::open(&db_path)?);
        tracing::info!(db = %db_path.display(), "database ready");

        let embedder = embedding::create_provider(&config.embedding)?;
        let stored = store.read(|conn| Ok(crate::db::migrations::get_embedding_model(conn)?))?;
        if let Some(stored) = stored {
            if stored != embedder.model_id() {
                tracing::warn!(
                    stored = %stored,
                    configured = %embedder.model_id(),
                    "embedding model changed, rebuild from the epoch to refresh node vectors"
                );
            }
        }
        tracing::info!(provider = %config.embedding.provider, model = %embedder.model_id(), "embedding provider ready");

        let narrator = NarratorAdapter::from_config(&config.narrator)?;
        tracing::info!(provider = %config.narrator.provider, "narrator ready");

        Ok(Self::with_parts(
            store,
            embedder,
            narrator,
            Arc::new(TracingSink),
            config,
        ))
    }

    /// Assemble a service from explicit parts.
    pub fn with_parts(
        store: Arc<GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        narrator: NarratorAdapter,
        sink: Arc<dyn MetricsSink>,
        config: ChronicleConfig,
    ) -> Self {
        let cache = Arc::new(SubgraphCache::from_config(&config.cache));
        let builder = GraphBuilder::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&cache),
            Arc::clone(&sink),
            config.builder.clone(),
        );
        let reasoner = TemporalReasoner::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&cache),
            Arc::new(narrator),
            sink,
            config.reasoner.clone(),
        );
        Self {
            store,
            embedder,
            builder,
            reasoner,
            cache,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn cache(&self) -> &SubgraphCache {
        &self.cache
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn reasoner(&self) -> &TemporalReasoner {
        &self.reasoner
    }

    /// Token cancelled when the process shuts down; rebuilds started through
    /// the service observe it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            embedding_model: self.embedder.model_id().to_string(),
            narrator_breaker: self.reasoner.narrator().breaker_state(),
            cache: self.cache.stats(),
        }
    }

    pub async fn ingest(&self, org_id: &str, records: Vec<ArtifactRecord>) -> Result<IngestReport> {
        let org = OrgId::parse(org_id)?;
        self.builder.ingest(&org, records).await
    }

    /// Rebuild from `since`, or from the last completed rebuild when `None`.
    pub async fn rebuild(&self, org_id: &str, since: Option<DateTime<Utc>>) -> Result<RebuildReport> {
        let org = OrgId::parse(org_id)?;
        let since = match since {
            Some(since) => since,
            None => self.builder.resume_point(&org).await?,
        };
        let cancel = self.shutdown.child_token();
        self.builder.rebuild(&org, since, &cancel).await
    }

    /// Rebuild with a caller-owned cancellation token.
    pub async fn rebuild_with_cancel(
        &self,
        org_id: &str,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        let org = OrgId::parse(org_id)?;
        self.builder.rebuild(&org, since, cancel).await
    }

    /// Stage `records`, then rebuild exactly what this call ingested.
    pub async fn ingest_and_rebuild(
        &self,
        org_id: &str,
        records: Vec<ArtifactRecord>,
    ) -> Result<IngestAndRebuild> {
        let org = OrgId::parse(org_id)?;
        let since = Utc::now();
        let ingest = self.builder.ingest(&org, records).await?;
        let cancel = self.shutdown.child_token();
        let rebuild = self.builder.rebuild(&org, since, &cancel).await?;
        Ok(IngestAndRebuild { ingest, rebuild })
    }

    pub async fn neighborhood(&self, org_id: &str, foreign_id: &str) -> Result<Neighborhood> {
        let org = OrgId::parse(org_id)?;
        self.reasoner.neighborhood(&org, foreign_id).await
    }

    /// `depth` and `k` default to the configured values; explicit values out
    /// of bounds are rejected.
    pub async fn explain(
        &self,
        org_id: &str,
        query: &str,
        depth: Option<usize>,
        k: Option<usize>,
    ) -> Result<Arc<Explanation>> {
        let org = OrgId::parse(org_id)?;
        let depth = depth.unwrap_or(self.config.reasoner.default_depth);
        let k = k.unwrap_or(self.config.reasoner.default_k);
        self.reasoner.explain(&org, query, depth, k).await
    }

    /// `window` defaults to the builder's temporal window.
    pub async fn timeline(
        &self,
        org_id: &str,
        foreign_id: &str,
        window: Option<chrono::Duration>,
    ) -> Result<Arc<TimelineResult>> {
        let org = OrgId::parse(org_id)?;
        let window = window.unwrap_or_else(|| self.config.builder.temporal_window());
        self.reasoner.timeline_for(&org, foreign_id, window).await
    }

    pub async fn stats(&self, org_id: &str) -> Result<GraphStats> {
        let org = OrgId::parse(org_id)?;
        let path = self.store.path().map(|p| p.to_path_buf());
        self.store
            .read_blocking(move |conn| graph_stats(conn, &org, path.as_deref()))
            .await
    }
}

/// Parse an RFC 3339 timestamp argument.
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| crate::error::GraphError::malformed(format!("invalid timestamp {raw:?}: {e}")))
}

/// Hours as a timeline window.
pub fn window_hours(hours: f64) -> Result<chrono::Duration> {
    let millis = hours * 3_600_000.0;
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(crate::error::GraphError::malformed(format!(
            "window of {hours} hours is out of range"
        )));
    }
    chrono::Duration::try_milliseconds(millis as i64).ok_or_else(|| {
        crate::error::GraphError::malformed(format!("window of {hours} hours is out of range"))
    })
}
