//! Graph construction: artifact ingestion and heuristic rebuilds.
//!
//! `rebuild(org, since)` reads every artifact ingested since the cutoff and
//! processes it in batches. Per batch, every heuristic runs on every artifact
//! as its own task; the proposals are then merged in one write transaction
//! that upserts artifact nodes, resolves (or stubs) referenced nodes, and
//! upserts edges. Cancellation is checked between batches, so a cancelled
//! rebuild always leaves whole batches behind and can be resumed by cutoff.

pub mod heuristics;
pub mod keys;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::audit::{GraphEvent, MetricsSink};
use crate::cache::SubgraphCache;
use crate::config::BuilderConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{GraphError, Result};
use crate::graph::artifacts::{
    artifacts_in_range, artifacts_since, ingest_artifact, last_completed_rebuild,
    record_rebuild_run, RunStatus,
};
use crate::graph::edges::upsert_edge;
use crate::graph::nodes::{ensure_node, upsert_artifact_node};
use crate::graph::store::GraphStore;
use crate::graph::types::{ArtifactRecord, CandidateEdge, NodeKind, NodeRef, OrgId};
use heuristics::{default_heuristics, Heuristic, HeuristicContext};

/// Outcome of [`GraphBuilder::ingest`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub received: u64,
    pub new: u64,
    pub updated: u64,
}

/// Per-heuristic edge counts for one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeuristicCounts {
    /// Candidate edges proposed.
    pub proposed: u64,
    /// Edges that did not exist before.
    pub created: u64,
    /// Existing edges re-proposed (confidence raised or kept).
    pub updated: u64,
    /// Candidates dropped at merge (self-references, invalid values).
    pub skipped: u64,
    /// Artifacts this heuristic failed on.
    pub failed: u64,
}

/// Outcome of [`GraphBuilder::rebuild`].
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub org_id: String,
    pub since: DateTime<Utc>,
    pub artifacts_processed: u64,
    pub batches: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub stubs_created: u64,
    pub heuristics: BTreeMap<&'static str, HeuristicCounts>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RebuildReport {
    fn new(org: &OrgId, since: DateTime<Utc>, heuristics: &[Arc<dyn Heuristic>]) -> Self {
        Self {
            org_id: org.to_string(),
            since,
            artifacts_processed: 0,
            batches: 0,
            nodes_created: 0,
            nodes_updated: 0,
            stubs_created: 0,
            heuristics: heuristics
                .iter()
                .map(|h| (h.name(), HeuristicCounts::default()))
                .collect(),
            cancelled: false,
            duration_ms: 0,
        }
    }

    fn counts(&mut self, heuristic: &'static str) -> &mut HeuristicCounts {
        self.heuristics.entry(heuristic).or_default()
    }

    pub fn edges_created(&self) -> u64 {
        self.heuristics.values().map(|c| c.created).sum()
    }

    pub fn edges_updated(&self) -> u64 {
        self.heuristics.values().map(|c| c.updated).sum()
    }

    pub fn heuristic_failures(&self) -> u64 {
        self.heuristics.values().map(|c| c.failed).sum()
    }
}

/// What one merge transaction changed.
#[derive(Debug, Default)]
struct MergeOutcome {
    nodes_created: u64,
    nodes_updated: u64,
    stubs_created: u64,
    edges: HashMap<&'static str, HeuristicCounts>,
}

/// A candidate together with the event time of the artifact that produced it.
struct Proposal {
    seen_at: DateTime<Utc>,
    edge: CandidateEdge,
}

pub struct GraphBuilder {
    store: Arc<GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<SubgraphCache>,
    sink: Arc<dyn MetricsSink>,
    heuristics: Vec<Arc<dyn Heuristic>>,
    config: BuilderConfig,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<SubgraphCache>,
        sink: Arc<dyn MetricsSink>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            sink,
            heuristics: default_heuristics(),
            config,
        }
    }

    /// Replace the heuristic set.
    pub fn with_heuristics(mut self, heuristics: Vec<Arc<dyn Heuristic>>) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Stage artifact records for the next rebuild.
    ///
    /// The whole call is rejected if any record names a different org.
    pub async fn ingest(&self, org: &OrgId, records: Vec<ArtifactRecord>) -> Result<IngestReport> {
        if let Some(bad) = records.iter().find(|r| r.org_id.trim() != org.as_str()) {
            tracing::warn!(
                target: "chronicle::security",
                org_id = %org,
                foreign_id = %bad.foreign_id,
                "rejected ingest batch containing a record for another org"
            );
            self.sink.emit(GraphEvent::SecurityViolation {
                org_id: org.to_string(),
                operation: "ingest",
                detail: format!("record {} carries a different org id", bad.foreign_id),
            });
            return Err(GraphError::CrossOrgAccessDenied {
                org_id: org.to_string(),
            });
        }

        let org = org.clone();
        self.store
            .write_blocking(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();
                let mut report = IngestReport::default();
                for record in &records {
                    report.received += 1;
                    if ingest_artifact(&tx, &org, record, &now)? {
                        report.new += 1;
                    } else {
                        report.updated += 1;
                    }
                }
                tx.commit()?;
                tracing::info!(org_id = %org, received = report.received, new = report.new, "artifacts ingested");
                Ok(report)
            })
            .await
    }

    /// Cutoff for resuming: the start of the last completed rebuild, or the
    /// epoch if there has never been one.
    pub async fn resume_point(&self, org: &OrgId) -> Result<DateTime<Utc>> {
        let org = org.clone();
        let last = self
            .store
            .read_blocking(move |conn| last_completed_rebuild(conn, &org))
            .await?;
        Ok(last.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// Rebuild the org's graph from artifacts ingested at or after `since`.
    pub async fn rebuild(
        &self,
        org: &OrgId,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut report = RebuildReport::new(org, since, &self.heuristics);

        let artifacts = {
            let org = org.clone();
            self.store
                .read_blocking(move |conn| artifacts_since(conn, &org, &since))
                .await?
        };
        let ctx = Arc::new(self.load_context(org, &artifacts).await?);
        tracing::info!(org_id = %org, artifacts = artifacts.len(), since = %since, "rebuild started");

        for batch in artifacts.chunks(self.config.batch_size.max(1)) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::info!(org_id = %org, batches_done = report.batches, "rebuild cancelled");
                break;
            }
            let batch: Vec<Arc<ArtifactRecord>> = batch.iter().cloned().map(Arc::new).collect();
            let embeddings = self.embed(&batch).await;
            let proposals = self.propose(org, &batch, &ctx, &mut report).await;
            let merged = self.merge(org, batch.clone(), embeddings, proposals).await?;

            report.artifacts_processed += batch.len() as u64;
            report.batches += 1;
            report.nodes_created += merged.nodes_created;
            report.nodes_updated += merged.nodes_updated;
            report.stubs_created += merged.stubs_created;
            for (name, counts) in merged.edges {
                let total = report.counts(name);
                total.created += counts.created;
                total.updated += counts.updated;
                total.skipped += counts.skipped;
            }
        }
        report.duration_ms = timer.elapsed().as_millis() as u64;

        let status = if report.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let ledger = serde_json::to_value(&report)?;
        {
            let org = org.clone();
            self.store
                .write_blocking(move |conn| {
                    record_rebuild_run(conn, &org, &since, &started_at, status, &ledger)
                })
                .await?;
        }

        // merged batches changed the graph even when the run was cut short
        self.cache.invalidate_org(org);
        self.sink.emit(if report.cancelled {
            GraphEvent::RebuildCancelled {
                org_id: org.to_string(),
                artifacts: report.artifacts_processed,
                batches: report.batches,
                edges_created: report.edges_created(),
                duration_ms: report.duration_ms,
            }
        } else {
            GraphEvent::RebuildCompleted {
                org_id: org.to_string(),
                artifacts: report.artifacts_processed,
                nodes_created: report.nodes_created,
                edges_created: report.edges_created(),
                edges_updated: report.edges_updated(),
                heuristic_failures: report.heuristic_failures(),
                duration_ms: report.duration_ms,
            }
        });
        tracing::info!(
            org_id = %org,
            artifacts = report.artifacts_processed,
            edges_created = report.edges_created(),
            edges_updated = report.edges_updated(),
            failures = report.heuristic_failures(),
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "rebuild finished"
        );
        Ok(report)
    }

    /// Deployments and incidents that can pair with anything in `artifacts`
    /// under the temporal-proximity rule.
    async fn load_context(
        &self,
        org: &OrgId,
        artifacts: &[ArtifactRecord],
    ) -> Result<HeuristicContext> {
        let mut ctx = HeuristicContext::new(&self.config);
        let (Some(min), Some(max)) = (
            artifacts.iter().map(|a| a.timestamp).min(),
            artifacts.iter().map(|a| a.timestamp).max(),
        ) else {
            return Ok(ctx);
        };
        let window = ctx.temporal_window;
        let org = org.clone();
        let (deployments, incidents) = self
            .store
            .read_blocking(move |conn| {
                Ok((
                    artifacts_in_range(conn, &org, NodeKind::Deployment, &(min - window), &max)?,
                    artifacts_in_range(conn, &org, NodeKind::Incident, &min, &(max + window))?,
                ))
            })
            .await?;
        ctx.deployments = deployments;
        ctx.incidents = incidents;
        Ok(ctx)
    }

    /// Embed every artifact of the batch. Failure leaves the batch without
    /// embeddings rather than failing the rebuild.
    async fn embed(&self, batch: &[Arc<ArtifactRecord>]) -> Vec<Option<Vec<f32>>> {
        let texts: Vec<String> = batch
            .iter()
            .map(|a| format!("{}\n{}", a.title, a.text))
            .collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                tracing::warn!(expected = batch.len(), got = vectors.len(), "embedding count mismatch");
                vec![None; batch.len()]
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, storing batch without vectors");
                vec![None; batch.len()]
            }
        }
    }

    /// Run every heuristic on every artifact concurrently.
    async fn propose(
        &self,
        org: &OrgId,
        batch: &[Arc<ArtifactRecord>],
        ctx: &Arc<HeuristicContext>,
        report: &mut RebuildReport,
    ) -> Vec<Proposal> {
        let mut tasks = JoinSet::new();
        let mut labels = HashMap::new();
        for (ai, artifact) in batch.iter().enumerate() {
            for (hi, heuristic) in self.heuristics.iter().enumerate() {
                let artifact = Arc::clone(artifact);
                let heuristic = Arc::clone(heuristic);
                let ctx = Arc::clone(ctx);
                let handle =
                    tasks.spawn(async move { (ai, hi, heuristic.propose(&artifact, &ctx)) });
                labels.insert(handle.id(), (ai, hi));
            }
        }

        let mut collected: Vec<(usize, usize, Vec<CandidateEdge>)> = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (ai, hi, outcome) = match joined {
                Ok((_, (ai, hi, outcome))) => (ai, hi, outcome),
                Err(join_err) => {
                    let Some(&(ai, hi)) = labels.get(&join_err.id()) else {
                        continue;
                    };
                    let reason = format!("heuristic task failed: {join_err}");
                    (ai, hi, Err(GraphError::internal(reason)))
                }
            };
            let name = self.heuristics[hi].name();
            let artifact = &batch[ai];
            match outcome {
                Ok(candidates) => {
                    report.counts(name).proposed += candidates.len() as u64;
                    collected.push((ai, hi, candidates));
                }
                Err(err) => {
                    report.counts(name).failed += 1;
                    tracing::warn!(
                        org_id = %org,
                        heuristic = name,
                        foreign_id = %artifact.foreign_id,
                        error = %err,
                        "heuristic failed, skipping artifact"
                    );
                    self.sink.emit(GraphEvent::HeuristicFailed {
                        org_id: org.to_string(),
                        heuristic: name,
                        foreign_id: artifact.foreign_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        // merge in a stable order regardless of task completion order
        collected.sort_by_key(|(ai, hi, _)| (*ai, *hi));
        collected
            .into_iter()
            .flat_map(|(ai, _, candidates)| {
                let seen_at = batch[ai].timestamp;
                candidates
                    .into_iter()
                    .map(move |edge| Proposal { seen_at, edge })
            })
            .collect()
    }

    /// Upsert the batch's nodes and all proposals in one transaction.
    async fn merge(
        &self,
        org: &OrgId,
        batch: Vec<Arc<ArtifactRecord>>,
        embeddings: Vec<Option<Vec<f32>>>,
        proposals: Vec<Proposal>,
    ) -> Result<MergeOutcome> {
        let org = org.clone();
        let summary_max = self.config.summary_max_chars;
        let model = self.embedder.model_id().to_string();
        self.store
            .write_blocking(move |conn| {
                let tx = conn.transaction()?;
                let mut outcome = MergeOutcome::default();

                for (artifact, embedding) in batch.iter().zip(&embeddings) {
                    let summary = summarize(artifact, summary_max);
                    let write =
                        upsert_artifact_node(&tx, &org, artifact, &summary, embedding.as_deref())?;
                    if write.created {
                        outcome.nodes_created += 1;
                    } else {
                        outcome.nodes_updated += 1;
                    }
                }

                for Proposal { seen_at, edge } in proposals {
                    let (src, src_new) = resolve(&tx, &org, &edge.src, &seen_at)?;
                    let (dst, dst_new) = resolve(&tx, &org, &edge.dst, &seen_at)?;
                    outcome.stubs_created += u64::from(src_new) + u64::from(dst_new);

                    let counts = outcome.edges.entry(edge.heuristic).or_default();
                    if src == dst {
                        counts.skipped += 1;
                        continue;
                    }
                    match upsert_edge(&tx, &org, &src, &dst, edge.relation, edge.confidence, &edge.metadata) {
                        Ok(write) if write.created => counts.created += 1,
                        Ok(_) => counts.updated += 1,
                        Err(GraphError::InvalidEdge(reason)) => {
                            tracing::debug!(heuristic = edge.heuristic, %reason, "candidate skipped");
                            counts.skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }

                if embeddings.iter().any(Option::is_some) {
                    crate::db::migrations::set_embedding_model(&tx, &model)?;
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await
    }
}

/// Resolve a reference to a node id, creating a stub if needed. Returns
/// `(id, created)`.
fn resolve(
    conn: &rusqlite::Connection,
    org: &OrgId,
    node: &NodeRef,
    seen_at: &DateTime<Utc>,
) -> Result<(String, bool)> {
    let stub_kind = node
        .kind
        .unwrap_or_else(|| keys::infer_kind(&node.foreign_id));
    let write = ensure_node(conn, org, &node.foreign_id, node.kind, stub_kind, seen_at)?;
    Ok((write.id, write.created))
}

/// First paragraph of the body (whitespace collapsed, at most `max_chars`),
/// or the title when there is no body.
pub fn summarize(artifact: &ArtifactRecord, max_chars: usize) -> String {
    let paragraph = artifact
        .text
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|p| !p.is_empty())
        .unwrap_or_else(|| artifact.title.trim().to_string());
    if paragraph.chars().count() <= max_chars {
        return paragraph;
    }
    let cut: String = paragraph.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
