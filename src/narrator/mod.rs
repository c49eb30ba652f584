//! Narrator boundary: cited prose for an explained subgraph.
//!
//! The external narrator is the only blocking dependency of `explain`. The
//! [`NarratorAdapter`] bounds every call by a timeout (never longer than the
//! caller's remaining deadline) and a [`breaker::CircuitBreaker`]; any failure
//! yields the deterministic [`template_narrative`] instead, so narration never
//! fails the surrounding query.

pub mod breaker;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NarratorConfig;
use crate::error::{GraphError, Result};
use crate::graph::types::{NodeKind, Relation};
use breaker::{BreakerConfig, BreakerState, CircuitBreaker};

#[derive(Debug, Clone, Serialize)]
pub struct NarrationNode {
    pub foreign_id: String,
    pub kind: NodeKind,
    pub title: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrationEdge {
    /// `foreign_id` of the source node.
    pub src: String,
    /// `foreign_id` of the destination node.
    pub dst: String,
    pub relation: Relation,
    pub confidence: f64,
}

/// Everything the narrator gets to see. Only the caller's org data is ever in
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationRequest {
    pub org_id: String,
    pub query: String,
    pub nodes: Vec<NarrationNode>,
    pub edges: Vec<NarrationEdge>,
    pub causal_chains: Vec<Vec<NarrationEdge>>,
}

/// External language-model capability.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Produce prose for the request. Should mention nodes by `foreign_id`.
    async fn narrate(&self, request: &NarrationRequest) -> Result<String>;
}

/// Final narrative handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Narration {
    pub text: String,
    /// `foreign_id`s of request nodes mentioned in `text`.
    pub citations: Vec<String>,
    /// `true` when the text came from the external narrator.
    pub narrated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

pub struct NarratorAdapter {
    narrator: Option<Arc<dyn Narrator>>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl NarratorAdapter {
    pub fn new(narrator: Option<Arc<dyn Narrator>>, timeout: Duration, breaker: BreakerConfig) -> Self {
        Self {
            narrator,
            breaker: CircuitBreaker::new(breaker),
            timeout,
        }
    }

    /// `provider = "none"` always uses the template; `"http"` calls the
    /// configured endpoint.
    pub fn from_config(config: &NarratorConfig) -> Result<Self> {
        let narrator: Option<Arc<dyn Narrator>> = match config.provider.as_str() {
            "none" => None,
            "http" => Some(Arc::new(remote::HttpNarrator::new(config)?)),
            other => {
                return Err(GraphError::NarratorUnavailable(format!(
                    "unknown narrator provider: {other}. Supported: none, http"
                )))
            }
        };
        Ok(Self::new(
            narrator,
            Duration::from_millis(config.timeout_ms),
            BreakerConfig::from_narrator(config),
        ))
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Narrate within `remaining`, falling back to the template on any
    /// narrator failure.
    pub async fn narrate(&self, request: &NarrationRequest, remaining: Duration) -> Narration {
        let Some(narrator) = &self.narrator else {
            return fallback(request, None);
        };
        match self.attempt(narrator.as_ref(), request, remaining).await {
            Ok(text) => Narration {
                citations: cite(&text, &request.nodes),
                text,
                narrated: true,
                fallback_reason: None,
            },
            Err(err) => {
                tracing::warn!(org_id = %request.org_id, error = %err, degraded = true, "narrator unavailable, using template");
                fallback(request, Some(err.to_string()))
            }
        }
    }

    async fn attempt(
        &self,
        narrator: &dyn Narrator,
        request: &NarrationRequest,
        remaining: Duration,
    ) -> Result<String> {
        let budget = self.timeout.min(remaining);
        if budget.is_zero() {
            return Err(GraphError::NarratorUnavailable("no time left in deadline".into()));
        }
        let permit = self.breaker.try_acquire().map_err(|retry_after| {
            GraphError::NarratorUnavailable(format!("circuit open, retry after {retry_after:?}"))
        })?;

        let outcome = match tokio::time::timeout(budget, narrator.narrate(request)).await {
            Ok(Ok(text)) => validate(&text, request),
            Ok(Err(e)) => Err(GraphError::NarratorUnavailable(e.to_string())),
            Err(_) => Err(GraphError::NarratorUnavailable(format!(
                "timed out after {budget:?}"
            ))),
        };
        match &outcome {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        outcome
    }
}

/// Reject prose that is empty, or that ignores every node of an existing
/// causality chain.
fn validate(text: &str, request: &NarrationRequest) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GraphError::NarratorUnavailable("empty narrative".into()));
    }
    let chain_ids: Vec<&str> = request
        .causal_chains
        .iter()
        .flatten()
        .flat_map(|e| [e.src.as_str(), e.dst.as_str()])
        .collect();
    if !chain_ids.is_empty() && !chain_ids.iter().any(|id| mentions(text, id)) {
        return Err(GraphError::NarratorUnavailable(
            "narrative cites none of the causality chain".into(),
        ));
    }
    Ok(text.to_string())
}

fn fallback(request: &NarrationRequest, reason: Option<String>) -> Narration {
    let text = template_narrative(request);
    Narration {
        citations: cite(&text, &request.nodes),
        text,
        narrated: false,
        fallback_reason: reason,
    }
}

/// `foreign_id`s of `nodes` that appear in `text`, in node order.
pub fn cite(text: &str, nodes: &[NarrationNode]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for node in nodes {
        if mentions(text, &node.foreign_id) && !out.contains(&node.foreign_id) {
            out.push(node.foreign_id.clone());
        }
    }
    out
}

/// Whole-token occurrence of `id` in `text` (`#45` does not match `#456`).
fn mentions(text: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    text.match_indices(id).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + id.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '#')
            && !after.is_some_and(|c| c.is_alphanumeric() || c == '-')
    })
}

/// Deterministic narrative built from the causality chains and node titles.
/// Every node of the request is mentioned by `foreign_id`.
pub fn template_narrative(request: &NarrationRequest) -> String {
    if request.nodes.is_empty() {
        return format!("No related artifacts were found for \"{}\".", request.query.trim());
    }
    let title_of = |fid: &str| {
        request
            .nodes
            .iter()
            .find(|n| n.foreign_id == fid)
            .map(|n| n.title.as_str())
            .unwrap_or("")
    };
    let describe = |fid: &str| {
        let title = title_of(fid);
        if title.is_empty() || title == fid {
            fid.to_string()
        } else {
            format!("{fid} ({title})")
        }
    };

    let mut sentences = Vec::new();
    for chain in &request.causal_chains {
        let steps: Vec<String> = chain
            .iter()
            .map(|e| format!("{} {} {}", describe(&e.src), e.relation.phrase(), describe(&e.dst)))
            .collect();
        if !steps.is_empty() {
            sentences.push(format!("{}.", steps.join("; ")));
        }
    }

    let mut ordered: Vec<&NarrationNode> = request.nodes.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.foreign_id.cmp(&b.foreign_id)));
    let sequence: Vec<String> = ordered
        .iter()
        .map(|n| format!("{} {} on {}", n.kind, describe(&n.foreign_id), n.created_at.format("%Y-%m-%d %H:%M UTC")))
        .collect();

    let lead = if sentences.is_empty() {
        "No causal chain was found; related artifacts in order".to_string()
    } else {
        format!("{} In order", sentences.join(" "))
    };
    format!("{lead}: {}.", sequence.join(", then "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Scripted(std::result::Result<&'static str, &'static str>, Duration);

    #[async_trait]
    impl Narrator for Scripted {
        async fn narrate(&self, _request: &NarrationRequest) -> Result<String> {
            tokio::time::sleep(self.1).await;
            self.0
                .map(str::to_string)
                .map_err(|e| GraphError::NarratorUnavailable(e.into()))
        }
    }

    fn node(fid: &str, title: &str, hour: u32) -> NarrationNode {
        NarrationNode {
            foreign_id: fid.into(),
            kind: NodeKind::Issue,
            title: title.into(),
            summary: String::new(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    fn request() -> NarrationRequest {
        let chain = vec![NarrationEdge {
            src: "#456".into(),
            dst: "ENG-102".into(),
            relation: Relation::Fixes,
            confidence: 1.0,
        }];
        NarrationRequest {
            org_id: "acme".into(),
            query: "why was ENG-102 reopened?".into(),
            nodes: vec![node("ENG-102", "Session expiry", 1), node("#456", "Extend TTL", 2), node("#45", "", 0)],
            edges: chain.clone(),
            causal_chains: vec![chain],
        }
    }

    fn adapter(narrator: Scripted, threshold: usize) -> NarratorAdapter {
        NarratorAdapter::new(
            Some(Arc::new(narrator)),
            Duration::from_millis(50),
            BreakerConfig {
                failure_threshold: threshold,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn template_cites_every_node_in_order() {
        let req = request();
        let text = template_narrative(&req);
        assert!(text.starts_with("#456 (Extend TTL) fixes ENG-102 (Session expiry)."));
        let cited = cite(&text, &req.nodes);
        assert_eq!(cited, vec!["ENG-102", "#456", "#45"]);
        assert!(text.find("#45 on").unwrap() < text.find("ENG-102 (Session expiry) on").unwrap());
    }

    #[test]
    fn mention_requires_token_boundary() {
        assert!(mentions("see #456.", "#456"));
        assert!(!mentions("see #456.", "#45"));
        assert!(!mentions("XENG-1", "ENG-1"));
        assert!(!mentions("ENG-10", "ENG-1"));
    }

    #[tokio::test]
    async fn narrator_prose_is_used_and_cited() {
        let a = adapter(Scripted(Ok("#456 fixed ENG-102 by extending the TTL."), Duration::ZERO), 3);
        let n = a.narrate(&request(), Duration::from_millis(500)).await;
        assert!(n.narrated);
        assert_eq!(n.citations, vec!["ENG-102", "#456"]);
    }

    #[tokio::test]
    async fn uncited_chain_falls_back() {
        let a = adapter(Scripted(Ok("Something happened."), Duration::ZERO), 3);
        let n = a.narrate(&request(), Duration::from_millis(500)).await;
        assert!(!n.narrated);
        assert!(n.fallback_reason.unwrap().contains("causality chain"));
    }

    #[tokio::test]
    async fn timeout_falls_back_and_trips_breaker() {
        let a = adapter(Scripted(Ok("#456"), Duration::from_millis(200)), 2);
        for _ in 0..2 {
            let n = a.narrate(&request(), Duration::from_millis(500)).await;
            assert!(!n.narrated);
            assert!(n.fallback_reason.unwrap().contains("timed out"));
        }
        assert_eq!(a.breaker_state(), BreakerState::Open);

        let started = std::time::Instant::now();
        let n = a.narrate(&request(), Duration::from_millis(500)).await;
        assert!(n.fallback_reason.unwrap().contains("circuit open"));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn aborted_half_open_call_does_not_wedge_the_circuit() {
        let a = Arc::new(NarratorAdapter::new(
            Some(Arc::new(Scripted(Ok("#456 fixed ENG-102."), Duration::from_secs(2)))),
            Duration::from_secs(5),
            BreakerConfig {
                failure_threshold: 1,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_millis(100),
            },
        ));
        let n = a.narrate(&request(), Duration::from_millis(10)).await;
        assert!(n.fallback_reason.unwrap().contains("timed out"));
        assert_eq!(a.breaker_state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let inflight = Arc::clone(&a);
        let trial = tokio::spawn(async move {
            inflight.narrate(&request(), Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.breaker_state(), BreakerState::HalfOpen);
        trial.abort();
        assert!(trial.await.unwrap_err().is_cancelled());
        assert_eq!(a.breaker_state(), BreakerState::Open);

        // after the cooldown the narrator is reached again
        tokio::time::sleep(Duration::from_millis(120)).await;
        let n = a.narrate(&request(), Duration::from_millis(10)).await;
        assert!(n.fallback_reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn remaining_deadline_caps_the_call() {
        let a = NarratorAdapter::new(
            Some(Arc::new(Scripted(Ok("#456"), Duration::from_millis(200)))),
            Duration::from_secs(5),
            BreakerConfig {
                failure_threshold: 5,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_secs(60),
            },
        );
        let started = std::time::Instant::now();
        let n = a.narrate(&request(), Duration::from_millis(20)).await;
        assert!(!n.narrated);
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn no_provider_uses_template() {
        let a = NarratorAdapter::from_config(&NarratorConfig::default()).unwrap();
        let n = a.narrate(&request(), Duration::from_millis(500)).await;
        assert!(!n.narrated);
        assert!(n.fallback_reason.is_none());
        assert_eq!(n.citations.len(), 3);
    }
}
