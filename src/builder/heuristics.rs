//! The six edge-proposal strategies.
//!
//! Each [`Heuristic`] reads one artifact (plus the immutable
//! [`HeuristicContext`] snapshot) and returns candidate edges. None of them
//! touches the graph, so the builder runs them concurrently.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::{json, Value};

use super::keys::{extract_keys, key_counts, normalize_key};
use crate::error::{GraphError, Result};
use crate::graph::types::{ArtifactRecord, CandidateEdge, NodeKind, NodeRef, Relation};

/// Read-only inputs shared by every heuristic during one rebuild.
#[derive(Debug, Clone)]
pub struct HeuristicContext {
    /// Deployments of the org whose event time may pair with an incident in
    /// the rebuild set.
    pub deployments: Vec<ArtifactRecord>,
    /// Incidents of the org whose event time may pair with a deployment in
    /// the rebuild set.
    pub incidents: Vec<ArtifactRecord>,
    pub temporal_window: Duration,
    pub decay_exponent: f64,
    pub max_cooccurrence_keys: usize,
}

impl HeuristicContext {
    pub fn new(config: &crate::config::BuilderConfig) -> Self {
        Self {
            deployments: Vec::new(),
            incidents: Vec::new(),
            temporal_window: config.temporal_window(),
            decay_exponent: config.decay_exponent,
            max_cooccurrence_keys: config.max_cooccurrence_keys,
        }
    }
}

/// One edge-proposal strategy.
pub trait Heuristic: Send + Sync {
    /// Stable name, recorded in edge metadata and rebuild reports.
    fn name(&self) -> &'static str;

    /// Propose candidate edges for `artifact`.
    ///
    /// Returns [`GraphError::HeuristicFailure`] when the artifact is malformed
    /// for this rule; the builder logs it and moves on.
    fn propose(&self, artifact: &ArtifactRecord, ctx: &HeuristicContext)
        -> Result<Vec<CandidateEdge>>;
}

/// All six heuristics, in report order.
pub fn default_heuristics() -> Vec<Arc<dyn Heuristic>> {
    vec![
        Arc::new(ExplicitReference),
        Arc::new(MeetingDerived),
        Arc::new(DeploymentLinkage),
        Arc::new(TemporalProximity),
        Arc::new(IdentifierCooccurrence),
        Arc::new(TypedExternalReference),
    ]
}

fn full_text(artifact: &ArtifactRecord) -> String {
    if artifact.text.is_empty() {
        artifact.title.clone()
    } else {
        format!("{}\n{}", artifact.title, artifact.text)
    }
}

fn is_self(artifact: &ArtifactRecord, key: &str) -> bool {
    normalize_key(&artifact.foreign_id) == key
}

fn candidate(
    src: NodeRef,
    dst: NodeRef,
    relation: Relation,
    confidence: f64,
    heuristic: &'static str,
    metadata: Value,
) -> CandidateEdge {
    CandidateEdge {
        src,
        dst,
        relation,
        confidence,
        heuristic,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// 1. explicit reference
// ---------------------------------------------------------------------------

static CLOSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(fix(?:es|ed)?|close[sd]?|resolve[sd]?)\s*:?\s+((?:#\d+|[a-z][a-z0-9]{1,14}-\d+)(?:\s*(?:,|and|&)\s*(?:#\d+|[a-z][a-z0-9]{1,14}-\d+))*)",
    )
    .expect("closing pattern is valid")
});

/// "fixes / closes / resolves KEY" in a body: `artifact --fixes--> KEY` and
/// `KEY --implements--> artifact`, both at confidence 1.0.
pub struct ExplicitReference;

impl Heuristic for ExplicitReference {
    fn name(&self) -> &'static str {
        "explicit_reference"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        _ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        let text = full_text(artifact);
        let mut out = Vec::new();
        let mut seen = Vec::new();
        for caps in CLOSING_RE.captures_iter(&text) {
            let verb = caps[1].to_lowercase();
            // the list is a standalone fragment, so every key in it is a mention
            let list = format!(" {}", &caps[2]);
            for mention in extract_keys(&list) {
                if is_self(artifact, &mention.key) || seen.contains(&mention.key) {
                    continue;
                }
                let meta = json!({ "heuristic": self.name(), "verb": verb });
                out.push(candidate(
                    artifact.node_ref(),
                    NodeRef::key(&mention.key),
                    Relation::Fixes,
                    1.0,
                    self.name(),
                    meta.clone(),
                ));
                out.push(candidate(
                    NodeRef::key(&mention.key),
                    artifact.node_ref(),
                    Relation::Implements,
                    1.0,
                    self.name(),
                    meta,
                ));
                seen.push(mention.key);
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 2. meeting-derived
// ---------------------------------------------------------------------------

static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(decision|decided|agreed|action(?: item)?s?|todo|follow[- ]up|owner)\b")
        .expect("decision pattern is valid")
});

/// Keys mentioned in a meeting summary or transcript:
/// `meeting --derived_from--> KEY`, 0.85 to 0.95.
pub struct MeetingDerived;

impl MeetingDerived {
    pub const BASE: f64 = 0.85;
    pub const CAP: f64 = 0.95;
}

impl Heuristic for MeetingDerived {
    fn name(&self) -> &'static str {
        "meeting_derived"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        _ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        if artifact.kind != NodeKind::Meeting {
            return Ok(Vec::new());
        }
        let text = full_text(artifact);
        let lines: Vec<&str> = text.lines().collect();
        let mentions = extract_keys(&text);

        let mut out = Vec::new();
        for (key, count) in key_counts(&text) {
            if is_self(artifact, &key) {
                continue;
            }
            let in_decision = mentions
                .iter()
                .filter(|m| m.key == key)
                .any(|m| lines.get(m.line).is_some_and(|l| DECISION_RE.is_match(l)));

            let mut confidence = Self::BASE;
            if in_decision {
                confidence += 0.05;
            }
            if count > 1 {
                confidence += 0.05;
            }
            let confidence = confidence.min(Self::CAP);

            out.push(candidate(
                artifact.node_ref(),
                NodeRef::key(&key),
                Relation::DerivedFrom,
                confidence,
                self.name(),
                json!({
                    "heuristic": self.name(),
                    "mentions": count,
                    "decision_context": in_decision,
                }),
            ));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 3. deployment linkage
// ---------------------------------------------------------------------------

/// Metadata fields a deployment may carry its change identifiers in.
const CHANGE_FIELDS: &[&str] = &["pr", "pull_request", "change_id", "prs"];
/// Optional event time of the linked change.
const CHANGE_TIME_FIELDS: &[&str] = &["pr_merged_at", "change_timestamp"];

/// Change identifiers in deployment metadata: a `next` / `previous` pair at
/// confidence 1.0, ordered by event time.
pub struct DeploymentLinkage;

impl DeploymentLinkage {
    fn failure(&self, artifact: &ArtifactRecord, reason: String) -> GraphError {
        GraphError::HeuristicFailure {
            heuristic: self.name(),
            foreign_id: artifact.foreign_id.clone(),
            reason,
        }
    }

    fn change_key(&self, artifact: &ArtifactRecord, field: &str, value: &Value) -> Result<String> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|n| format!("#{n}"))
                .ok_or_else(|| self.failure(artifact, format!("{field} is not a change number: {n}"))),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Err(self.failure(artifact, format!("{field} is empty")))
                } else if s.chars().all(|c| c.is_ascii_digit()) {
                    Ok(format!("#{s}"))
                } else {
                    Ok(normalize_key(s))
                }
            }
            other => Err(self.failure(
                artifact,
                format!("{field} has unsupported type: {}", type_name(other)),
            )),
        }
    }

    fn change_time(&self, artifact: &ArtifactRecord) -> Result<Option<DateTime<Utc>>> {
        for field in CHANGE_TIME_FIELDS {
            match artifact.metadata.get(*field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(raw)) => {
                    let ts = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                        self.failure(artifact, format!("{field} is not RFC 3339: {e}"))
                    })?;
                    return Ok(Some(ts.with_timezone(&Utc)));
                }
                Some(other) => {
                    return Err(self.failure(
                        artifact,
                        format!("{field} has unsupported type: {}", type_name(other)),
                    ))
                }
            }
        }
        Ok(None)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Heuristic for DeploymentLinkage {
    fn name(&self) -> &'static str {
        "deployment_linkage"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        _ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        if artifact.kind != NodeKind::Deployment {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for field in CHANGE_FIELDS {
            match artifact.metadata.get(*field) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        keys.push(self.change_key(artifact, field, item)?);
                    }
                }
                Some(value) => keys.push(self.change_key(artifact, field, value)?),
            }
        }
        keys.sort_unstable();
        keys.dedup();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // change normally precedes the deployment that ships it
        let change_after_deploy = self
            .change_time(artifact)?
            .is_some_and(|t| t > artifact.timestamp);

        let mut out = Vec::new();
        for key in keys {
            if is_self(artifact, &key) {
                continue;
            }
            let change = NodeRef::typed(&key, NodeKind::PullRequest);
            let deploy = artifact.node_ref();
            let (first, second) = if change_after_deploy {
                (deploy, change)
            } else {
                (change, deploy)
            };
            let meta = json!({ "heuristic": self.name(), "change": key });
            out.push(candidate(
                first.clone(),
                second.clone(),
                Relation::Next,
                1.0,
                self.name(),
                meta.clone(),
            ));
            out.push(candidate(second, first, Relation::Previous, 1.0, self.name(), meta));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 4. temporal proximity
// ---------------------------------------------------------------------------

/// An incident within the window after a deployment:
/// `incident --caused_by--> deployment`, confidence decaying from 0.9 to 0.5.
pub struct TemporalProximity;

impl TemporalProximity {
    pub const MAX_CONFIDENCE: f64 = 0.9;
    pub const MIN_CONFIDENCE: f64 = 0.5;

    /// Confidence for an incident `delta` after a deployment, or `None`
    /// outside `[0, window]`.
    pub fn confidence(delta: Duration, window: Duration, exponent: f64) -> Option<f64> {
        if delta < Duration::zero() || delta > window || window <= Duration::zero() {
            return None;
        }
        let ratio = delta.num_milliseconds() as f64 / window.num_milliseconds() as f64;
        Some(
            Self::MAX_CONFIDENCE
                - (Self::MAX_CONFIDENCE - Self::MIN_CONFIDENCE) * ratio.powf(exponent),
        )
    }

    fn edge(
        &self,
        incident: &ArtifactRecord,
        deployment: &ArtifactRecord,
        ctx: &HeuristicContext,
    ) -> Option<CandidateEdge> {
        if incident.org_id != deployment.org_id {
            return None;
        }
        let delta = incident.timestamp - deployment.timestamp;
        let confidence = Self::confidence(delta, ctx.temporal_window, ctx.decay_exponent)?;
        Some(candidate(
            incident.node_ref(),
            deployment.node_ref(),
            Relation::CausedBy,
            confidence,
            self.name(),
            json!({
                "heuristic": self.name(),
                "delta_secs": delta.num_seconds(),
                "window_secs": ctx.temporal_window.num_seconds(),
            }),
        ))
    }
}

impl Heuristic for TemporalProximity {
    fn name(&self) -> &'static str {
        "temporal_proximity"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        let out = match artifact.kind {
            NodeKind::Incident => ctx
                .deployments
                .iter()
                .filter_map(|d| self.edge(artifact, d, ctx))
                .collect(),
            NodeKind::Deployment => ctx
                .incidents
                .iter()
                .filter_map(|i| self.edge(i, artifact, ctx))
                .collect(),
            _ => Vec::new(),
        };
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 5. identifier co-occurrence
// ---------------------------------------------------------------------------

/// Two or more keys mentioned in the same body: `references` between each
/// pair, in order of first appearance, 0.6 to 0.8.
pub struct IdentifierCooccurrence;

impl IdentifierCooccurrence {
    pub const BASE: f64 = 0.6;
    pub const CAP: f64 = 0.8;

    pub fn confidence(mentions_a: usize, mentions_b: usize) -> f64 {
        let shared = mentions_a.min(mentions_b).saturating_sub(1) as f64;
        (Self::BASE + 0.05 * shared).min(Self::CAP)
    }
}

impl Heuristic for IdentifierCooccurrence {
    fn name(&self) -> &'static str {
        "identifier_cooccurrence"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        let keys: Vec<(String, usize)> = key_counts(&full_text(artifact))
            .into_iter()
            .filter(|(k, _)| !is_self(artifact, k))
            .take(ctx.max_cooccurrence_keys)
            .collect();

        let mut out = Vec::new();
        for (i, (a, count_a)) in keys.iter().enumerate() {
            for (b, count_b) in &keys[i + 1..] {
                out.push(candidate(
                    NodeRef::key(a),
                    NodeRef::key(b),
                    Relation::References,
                    Self::confidence(*count_a, *count_b),
                    self.name(),
                    json!({
                        "heuristic": self.name(),
                        "source": artifact.foreign_id,
                    }),
                ));
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// 6. typed external reference
// ---------------------------------------------------------------------------

static GITHUB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?github\.com/([\w.-]+/[\w.-]+)/(pull|issues|discussions)/(\d+)")
        .expect("github pattern is valid")
});

static GITLAB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?gitlab\.com/([\w./-]+?)/-/(merge_requests|issues)/(\d+)")
        .expect("gitlab pattern is valid")
});

static SHORT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(\[])([A-Za-z0-9][\w.-]*/[\w.-]+)#(\d+)\b")
        .expect("short ref pattern is valid")
});

/// Code-hosting URLs and `owner/repo#N` mentions:
/// `artifact --references--> target` at 0.9 with the reference type recorded.
pub struct TypedExternalReference;

impl TypedExternalReference {
    pub const CONFIDENCE: f64 = 0.9;
}

impl Heuristic for TypedExternalReference {
    fn name(&self) -> &'static str {
        "typed_external_reference"
    }

    fn propose(
        &self,
        artifact: &ArtifactRecord,
        _ctx: &HeuristicContext,
    ) -> Result<Vec<CandidateEdge>> {
        let text = full_text(artifact);
        // (key, kind, ref_type, platform, repo)
        let mut refs: Vec<(String, Option<NodeKind>, &'static str, &'static str, String)> =
            Vec::new();

        for caps in GITHUB_RE.captures_iter(&text) {
            let (kind, ref_type) = match &caps[2] {
                "pull" => (NodeKind::PullRequest, "pull_request"),
                "issues" => (NodeKind::Issue, "issue"),
                _ => (NodeKind::Discussion, "discussion"),
            };
            refs.push((format!("#{}", &caps[3]), Some(kind), ref_type, "github", caps[1].to_string()));
        }
        for caps in GITLAB_RE.captures_iter(&text) {
            let (kind, ref_type) = match &caps[2] {
                "merge_requests" => (NodeKind::PullRequest, "merge_request"),
                _ => (NodeKind::Issue, "issue"),
            };
            refs.push((format!("#{}", &caps[3]), Some(kind), ref_type, "gitlab", caps[1].to_string()));
        }
        for caps in SHORT_REF_RE.captures_iter(&text) {
            refs.push((format!("#{}", &caps[2]), None, "change", "repository", caps[1].to_string()));
        }

        let mut out: Vec<CandidateEdge> = Vec::new();
        for (key, kind, ref_type, platform, repo) in refs {
            if is_self(artifact, &key) || out.iter().any(|c| c.dst.foreign_id == key) {
                continue;
            }
            let dst = match kind {
                Some(kind) => NodeRef::typed(&key, kind),
                None => NodeRef::key(&key),
            };
            out.push(candidate(
                artifact.node_ref(),
                dst,
                Relation::References,
                Self::CONFIDENCE,
                self.name(),
                json!({
                    "heuristic": self.name(),
                    "ref_type": ref_type,
                    "platform": platform,
                    "repo": repo,
                }),
            ));
        }
        Ok(out)
    }
}
