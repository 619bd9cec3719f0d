//! Immutable job-graph templates and their per-run instances.
//!
//! A [`JobGraph`] is validated once and can be shared across any number of
//! scans. Each scan calls [`JobGraph::instantiate`] to get a [`ScanRun`] with
//! fresh nodes, so fan-in counters and claims never leak between runs.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use scanflow_model::{JobStatus, LibraryId, ScanIdentity, StageId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{JobNode, StageContext, StageHandler, merge_outcomes};
use super::stages::library_scan_handlers;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no stages")]
    Empty,
    #[error("stage {0} registered twice")]
    DuplicateStage(StageId),
    #[error("edge references unknown stage {0}")]
    UnknownStage(StageId),
    #[error("stage {0} cannot depend on itself")]
    SelfEdge(StageId),
    #[error("dependency cycle through stage {0}")]
    Cycle(StageId),
}

struct StageTemplate {
    id: StageId,
    handler: Arc<dyn StageHandler>,
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// Collects stages and edges, then validates them into a [`JobGraph`].
#[derive(Default)]
pub struct JobGraphBuilder {
    stages: Vec<Arc<dyn StageHandler>>,
    edges: Vec<(StageId, StageId)>,
}

impl fmt::Debug for JobGraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGraphBuilder")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("edges", &self.edges)
            .finish()
    }
}

impl JobGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.stages.push(handler);
        self
    }

    /// `child` runs only after `parent` (and every other parent) completed.
    pub fn edge(mut self, parent: impl Into<StageId>, child: impl Into<StageId>) -> Self {
        self.edges.push((parent.into(), child.into()));
        self
    }

    pub fn build(self) -> std::result::Result<JobGraph, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(self.stages.len());
        let mut templates = Vec::with_capacity(self.stages.len());
        for handler in self.stages {
            let id = handler.id();
            if index.insert(id.clone(), templates.len()).is_some() {
                return Err(GraphError::DuplicateStage(id));
            }
            templates.push(StageTemplate {
                id,
                handler,
                parents: Vec::new(),
                children: Vec::new(),
            });
        }

        for (parent, child) in self.edges {
            if parent == child {
                return Err(GraphError::SelfEdge(parent));
            }
            let from = *index
                .get(&parent)
                .ok_or_else(|| GraphError::UnknownStage(parent.clone()))?;
            let to = *index
                .get(&child)
                .ok_or_else(|| GraphError::UnknownStage(child.clone()))?;
            // A repeated edge would demand a second notification that never comes.
            if templates[from].children.contains(&to) {
                continue;
            }
            templates[from].children.push(to);
            templates[to].parents.push(from);
        }

        let order = topological_order(&templates)?;
        Ok(JobGraph {
            stages: templates,
            index,
            order,
        })
    }
}

/// Kahn's algorithm; ties resolve in registration order.
fn topological_order(
    templates: &[StageTemplate],
) -> std::result::Result<Vec<usize>, GraphError> {
    let mut remaining: Vec<usize> = templates.iter().map(|t| t.parents.len()).collect();
    let mut ready: VecDeque<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(templates.len());
    while let Some(next) = ready.pop_front() {
        order.push(next);
        for &child in &templates[next].children {
            remaining[child] -= 1;
            if remaining[child] == 0 {
                ready.push_back(child);
            }
        }
    }

    if order.len() != templates.len() {
        let stuck = remaining
            .iter()
            .position(|count| *count > 0)
            .unwrap_or_default();
        return Err(GraphError::Cycle(templates[stuck].id.clone()));
    }
    Ok(order)
}

/// Validated, immutable topology of stages.
pub struct JobGraph {
    stages: Vec<StageTemplate>,
    index: HashMap<StageId, usize>,
    order: Vec<usize>,
}

impl fmt::Debug for JobGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGraph")
            .field("order", &self.topological_order())
            .field("edges", &self.edges())
            .finish()
    }
}

impl JobGraph {
    pub fn builder() -> JobGraphBuilder {
        JobGraphBuilder::new()
    }

    /// The default pipeline:
    /// `discovery -> {comparison, repository_lookup} -> metadata_save`.
    pub fn library_scan() -> std::result::Result<Self, GraphError> {
        library_scan_handlers()
            .into_iter()
            .fold(JobGraphBuilder::new(), JobGraphBuilder::stage)
            .edge(StageId::DISCOVERY, StageId::COMPARISON)
            .edge(StageId::DISCOVERY, StageId::REPOSITORY_LOOKUP)
            .edge(StageId::COMPARISON, StageId::METADATA_SAVE)
            .edge(StageId::REPOSITORY_LOOKUP, StageId::METADATA_SAVE)
            .build()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, stage: &StageId) -> bool {
        self.index.contains_key(stage)
    }

    /// Stages without parents.
    pub fn roots(&self) -> Vec<StageId> {
        self.select(|t| t.parents.is_empty())
    }

    /// Stages without children; these publish `ScanFinished`.
    pub fn terminals(&self) -> Vec<StageId> {
        self.select(|t| t.children.is_empty())
    }

    pub fn parents_of(&self, stage: &StageId) -> Vec<StageId> {
        self.neighbours(stage, |t| &t.parents)
    }

    pub fn children_of(&self, stage: &StageId) -> Vec<StageId> {
        self.neighbours(stage, |t| &t.children)
    }

    pub fn topological_order(&self) -> Vec<StageId> {
        self.order
            .iter()
            .map(|&i| self.stages[i].id.clone())
            .collect()
    }

    /// Every `(parent, child)` pair, in topological order of the parent.
    pub fn edges(&self) -> Vec<(StageId, StageId)> {
        self.order
            .iter()
            .flat_map(|&i| {
                let parent = &self.stages[i].id;
                self.stages[i]
                    .children
                    .iter()
                    .map(move |&c| (parent.clone(), self.stages[c].id.clone()))
            })
            .collect()
    }

    fn select(&self, keep: impl Fn(&StageTemplate) -> bool) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|t| keep(t))
            .map(|t| t.id.clone())
            .collect()
    }

    fn neighbours(
        &self,
        stage: &StageId,
        edges: impl Fn(&StageTemplate) -> &Vec<usize>,
    ) -> Vec<StageId> {
        self.index
            .get(stage)
            .map(|&i| {
                edges(&self.stages[i])
                    .iter()
                    .map(|&j| self.stages[j].id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fresh nodes for one scan run, all Pending with zeroed counters.
    pub fn instantiate(&self, context: Arc<StageContext>) -> Result<ScanRun> {
        let nodes: Vec<Arc<JobNode>> = self
            .stages
            .iter()
            .map(|t| {
                Arc::new(JobNode::new(
                    t.id.clone(),
                    t.handler.clone(),
                    context.clone(),
                ))
            })
            .collect();

        for (template, node) in self.stages.iter().zip(&nodes) {
            let parents = template
                .parents
                .iter()
                .map(|&p| Arc::downgrade(&nodes[p]))
                .collect();
            let children = template.children.iter().map(|&c| nodes[c].clone()).collect();
            node.connect(parents, children)?;
        }

        let roots = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, t)| t.parents.is_empty())
            .map(|(i, _)| i)
            .collect();

        Ok(ScanRun {
            context,
            nodes,
            roots,
            index: self.index.clone(),
        })
    }
}

/// One execution of a [`JobGraph`]. Single use: a second `execute` finds
/// every node already claimed and does nothing.
pub struct ScanRun {
    context: Arc<StageContext>,
    nodes: Vec<Arc<JobNode>>,
    roots: Vec<usize>,
    index: HashMap<StageId, usize>,
}

impl fmt::Debug for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRun")
            .field("identity", &self.context.identity)
            .field("library_id", &self.context.library_id)
            .field("nodes", &self.nodes)
            .finish()
    }
}

impl ScanRun {
    pub fn identity(&self) -> ScanIdentity {
        self.context.identity
    }

    pub fn library_id(&self) -> LibraryId {
        self.context.library_id
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.context
    }

    pub fn node(&self, stage: &StageId) -> Option<&Arc<JobNode>> {
        self.index.get(stage).map(|&i| &self.nodes[i])
    }

    pub fn status_of(&self, stage: &StageId) -> Option<JobStatus> {
        self.node(stage).map(|node| node.status())
    }

    pub fn nodes(&self) -> &[Arc<JobNode>] {
        &self.nodes
    }

    /// Starts every root concurrently and waits until the whole graph
    /// settled. Failure is reported ahead of cancellation; the first failing
    /// stage stops the remaining branches and is the only one reported.
    pub async fn execute(&self, cancel: CancellationToken) -> Result<()> {
        let identity = self.context.identity;
        info!(
            target: "scan::jobs",
            scan_id = %identity.scan_id,
            user_id = %identity.user_id,
            library_id = %self.context.library_id,
            roots = self.roots.len(),
            "scan run started"
        );

        // A failing stage halts the run through this token, not the caller's.
        let run_cancel = cancel.child_token();
        let starts = self
            .roots
            .iter()
            .map(|&i| self.nodes[i].clone().execute(None, run_cancel.clone()));
        let outcome = merge_outcomes(join_all(starts).await);

        match &outcome {
            Ok(()) => debug!(target: "scan::jobs", scan_id = %identity.scan_id, "scan run settled"),
            Err(err) if err.is_cancelled() => {
                info!(target: "scan::jobs", scan_id = %identity.scan_id, "scan run cancelled")
            }
            Err(err) => warn!(
                target: "scan::jobs",
                scan_id = %identity.scan_id,
                error = %err,
                "scan run failed"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::orchestration::job::{StageInputs, StagePayload};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl StageHandler for Named {
        fn id(&self) -> StageId {
            StageId::new(self.0)
        }

        async fn run(
            &self,
            _ctx: Arc<StageContext>,
            _inputs: StageInputs,
            _cancel: CancellationToken,
        ) -> Result<StagePayload> {
            Ok(StagePayload::Empty)
        }
    }

    fn named(name: &'static str) -> Arc<dyn StageHandler> {
        Arc::new(Named(name))
    }

    #[test]
    fn library_scan_is_a_diamond() {
        let graph = JobGraph::library_scan().unwrap();
        assert_eq!(graph.roots(), vec![StageId::DISCOVERY]);
        assert_eq!(graph.terminals(), vec![StageId::METADATA_SAVE]);
        assert_eq!(
            graph.children_of(&StageId::DISCOVERY),
            vec![StageId::COMPARISON, StageId::REPOSITORY_LOOKUP]
        );
        assert_eq!(
            graph.parents_of(&StageId::METADATA_SAVE),
            vec![StageId::COMPARISON, StageId::REPOSITORY_LOOKUP]
        );
        assert_eq!(
            graph.topological_order(),
            vec![
                StageId::DISCOVERY,
                StageId::COMPARISON,
                StageId::REPOSITORY_LOOKUP,
                StageId::METADATA_SAVE
            ]
        );
    }

    #[test]
    fn rejects_duplicate_stages() {
        let err = JobGraph::builder()
            .stage(named("a"))
            .stage(named("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateStage(StageId::new("a")));
    }

    #[test]
    fn rejects_unknown_and_self_edges() {
        let err = JobGraph::builder()
            .stage(named("a"))
            .edge("a", "b")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownStage(StageId::new("b")));

        let err = JobGraph::builder()
            .stage(named("a"))
            .edge("a", "a")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::SelfEdge(StageId::new("a")));
    }

    #[test]
    fn rejects_cycles() {
        let err = JobGraph::builder()
            .stage(named("root"))
            .stage(named("a"))
            .stage(named("b"))
            .edge("root", "a")
            .edge("a", "b")
            .edge("b", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn rejects_empty_graph() {
        assert_eq!(JobGraph::builder().build().unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn repeated_edges_collapse() {
        let graph = JobGraph::builder()
            .stage(named("a"))
            .stage(named("b"))
            .edge("a", "b")
            .edge("a", "b")
            .build()
            .unwrap();
        assert_eq!(graph.parents_of(&StageId::new("b")), vec![StageId::new("a")]);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn unknown_stage_has_no_neighbours() {
        let graph = JobGraph::library_scan().unwrap();
        assert!(graph.parents_of(&StageId::new("nope")).is_empty());
        assert!(!graph.contains(&StageId::new("nope")));
    }
}
