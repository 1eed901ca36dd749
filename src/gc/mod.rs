//! Garbage collection of nodes no retained version can reach
//!
//! Two ways to collect:
//! - mark-sweep: resolve the retained roots, mark everything reachable from
//!   them (in memory or in a scratch database on disk), then delete every
//!   other node in bounded batches
//! - reference counting: counts maintained at commit time let released
//!   versions free their unique nodes without a full pass
//!
//! Marking always completes before the first delete, so an interrupted sweep
//! leaves some garbage behind but never loses a reachable node.
//!
//! Commits may run during a mark-sweep. Node writes are recorded from before
//! the roots are resolved until the sweep ends, and recorded nodes are never
//! deleted; roots committed while marking are marked before the sweep too.
//! Reference counting only runs when every retained version was committed
//! with counts.

mod mark;
mod policy;
mod refcount;
mod refs;

pub use mark::{mark, DiskMarkSet, InMemoryMarkSet, MarkSet};
pub use policy::{Retention, RetentionPolicy};
pub use refcount::RefcountTracker;
pub use refs::{NodeRefs, SmtNodeRefs, TrieNodeRefs};

use crate::model::NodeHash;
use crate::store::{in_batch, NodeReader, NodeStore, RootsIndex};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Rows per delete batch unless configured otherwise
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 10_000;

static TRIE_REFS: TrieNodeRefs = TrieNodeRefs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcStrategy {
    /// Mark set in a heap hash set
    InMemoryMarkSweep,
    /// Mark set in a temporary RocksDB, for stores larger than memory
    OnDiskMarkSweep,
    /// Release counted references of pruned versions
    Refcount,
}

/// Called with the number of nodes deleted so far
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
pub struct GcOptions {
    /// Report what would be deleted without deleting
    pub dry_run: bool,
    pub delete_batch_size: usize,
    /// Mark against a point-in-time snapshot; nodes first committed after it are never swept
    pub use_snapshot: bool,
    /// Also drop the index entries of versions that were not retained
    pub prune_index: bool,
    pub progress: Option<ProgressFn>,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptions {
            dry_run: false,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            use_snapshot: true,
            prune_index: false,
            progress: None,
        }
    }
}

impl GcOptions {
    pub fn dry_run() -> Self {
        GcOptions {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    fn report_progress(&self, deleted: u64) {
        if let Some(progress) = &self.progress {
            progress(deleted);
        }
    }
}

impl fmt::Debug for GcOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcOptions")
            .field("dry_run", &self.dry_run)
            .field("delete_batch_size", &self.delete_batch_size)
            .field("use_snapshot", &self.use_snapshot)
            .field("prune_index", &self.prune_index)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Outcome of one collection; on a dry run `deleted` counts what would go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub marked: u64,
    pub total: u64,
    pub deleted: u64,
    pub duration_millis: u64,
}

impl GcReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Marking,
    Sweeping,
    /// Dry run: enumerate without deleting
    Reporting,
    Done,
}

/// Phase tracking of one mark-sweep run
#[derive(Debug)]
pub struct GcRun {
    phase: GcPhase,
}

impl Default for GcRun {
    fn default() -> Self {
        Self::new()
    }
}

impl GcRun {
    pub fn new() -> Self {
        GcRun { phase: GcPhase::Idle }
    }

    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Move to `next`; sweeping or reporting is only reachable from a completed mark
    pub fn advance(&mut self, next: GcPhase) -> Result<()> {
        use GcPhase::*;
        let allowed = matches!(
            (self.phase, next),
            (Idle, Marking)
                | (Idle, Done)
                | (Marking, Sweeping)
                | (Marking, Reporting)
                | (Sweeping, Done)
                | (Reporting, Done)
        );
        if !allowed {
            return Err(Error::Policy(format!(
                "gc cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        debug!(from = ?self.phase, to = ?next, "gc phase");
        self.phase = next;
        Ok(())
    }
}

/// Reads nodes straight from the store when no snapshot is pinned
struct LiveNodes<'a>(&'a dyn NodeStore);

impl<'a> NodeReader for LiveNodes<'a> {
    fn read(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>> {
        self.0.get(hash)
    }
}

/// Records node writes for as long as it lives
struct WriteTracking<'a>(&'a dyn NodeStore);

impl<'a> WriteTracking<'a> {
    fn start(nodes: &'a dyn NodeStore) -> Result<Self> {
        nodes.track_writes()?;
        Ok(WriteTracking(nodes))
    }
}

impl<'a> Drop for WriteTracking<'a> {
    fn drop(&mut self) {
        self.0.untrack_writes();
    }
}

/// Runs collections over one node store and its roots index
pub struct GcManager<'a> {
    nodes: &'a dyn NodeStore,
    roots: &'a dyn RootsIndex,
    refs: &'a dyn NodeRefs,
}

impl<'a> GcManager<'a> {
    /// Manager for Patricia trie nodes
    pub fn new(nodes: &'a dyn NodeStore, roots: &'a dyn RootsIndex) -> Self {
        GcManager {
            nodes,
            roots,
            refs: &TRIE_REFS,
        }
    }

    /// Use another node layout, e.g. [`SmtNodeRefs`]
    pub fn with_refs(mut self, refs: &'a dyn NodeRefs) -> Self {
        self.refs = refs;
        self
    }

    pub fn refcount_tracker(&self) -> RefcountTracker<'a> {
        RefcountTracker::new(self.nodes, self.refs)
    }

    /// Record `root` under the next version and count its references
    ///
    /// Counts, version and counted marker are written in one node-store
    /// batch, together with any node writes of an enclosing batch.
    pub fn record_counted(&self, root: &NodeHash) -> Result<u64> {
        let tracker = self.refcount_tracker();
        in_batch(self.nodes, || {
            tracker.increment_root(root)?;
            let version = self.roots.next_version()?;
            self.roots.put(version, root)?;
            self.roots.set_counted(version, true)?;
            Ok(version)
        })
    }

    pub fn run(&self, strategy: GcStrategy, policy: &RetentionPolicy, options: &GcOptions) -> Result<GcReport> {
        info!(?strategy, ?policy, dry_run = options.dry_run, "starting gc");
        let report = match strategy {
            GcStrategy::InMemoryMarkSweep => self.mark_sweep(&mut InMemoryMarkSet::new(), policy, options)?,
            GcStrategy::OnDiskMarkSweep => self.mark_sweep(&mut DiskMarkSet::create()?, policy, options)?,
            GcStrategy::Refcount => self.run_refcount_collect(policy, options)?,
        };
        info!(
            marked = report.marked,
            total = report.total,
            deleted = report.deleted,
            duration_millis = report.duration_millis,
            "gc finished"
        );
        Ok(report)
    }

    /// Mark from the retained roots into `set`, then sweep
    ///
    /// Pruned versions lose their counted markers, since the sweep may delete
    /// nodes their counts refer to.
    pub fn mark_sweep(&self, set: &mut dyn MarkSet, policy: &RetentionPolicy, options: &GcOptions) -> Result<GcReport> {
        let started = Instant::now();
        let mut run = GcRun::new();

        let _tracking = WriteTracking::start(self.nodes)?;
        let retention = policy.resolve(self.roots)?;
        if retention.is_empty() {
            run.advance(GcPhase::Done)?;
            return Ok(GcReport {
                duration_millis: elapsed_millis(started),
                ..GcReport::default()
            });
        }
        let roots = retention.retained_roots();

        // pinned after the roots are resolved, so every retained root is in it
        let pinned = if options.use_snapshot {
            Some(self.nodes.snapshot()?)
        } else {
            None
        };
        let live = LiveNodes(self.nodes);
        let reader: &dyn NodeReader = match &pinned {
            Some(snapshot) => snapshot.as_ref(),
            None => &live,
        };

        run.advance(GcPhase::Marking)?;
        let mut marked = mark(reader, self.refs, &roots, set)?;
        marked += self.mark_late_roots(&retention, set)?;
        run.advance(if options.dry_run {
            GcPhase::Reporting
        } else {
            GcPhase::Sweeping
        })?;

        let (total, deleted) = self.sweep(&run, set, pinned.as_deref(), options)?;
        if !options.dry_run {
            if options.prune_index {
                self.drop_versions(&retention)?;
            } else {
                self.uncount_versions(&retention)?;
            }
        }
        run.advance(GcPhase::Done)?;

        Ok(GcReport {
            marked,
            total,
            deleted,
            duration_millis: elapsed_millis(started),
        })
    }

    /// Delete (or on a dry run, count) every node outside `marked`
    ///
    /// Kept as well: nodes absent from `pinned`, and nodes put since write
    /// recording started (see [`NodeStore::track_writes`]). Without recording,
    /// an unmarked node that exists in `pinned` is deleted even if a writer
    /// has put it again since; [`GcManager::mark_sweep`] records for its
    /// whole run.
    pub fn sweep(
        &self,
        run: &GcRun,
        marked: &dyn MarkSet,
        pinned: Option<&dyn NodeReader>,
        options: &GcOptions,
    ) -> Result<(u64, u64)> {
        let dry_run = match run.phase() {
            GcPhase::Sweeping => false,
            GcPhase::Reporting => true,
            other => {
                return Err(Error::Policy(format!(
                    "sweep requires a completed mark, gc is {:?}",
                    other
                )))
            }
        };
        let batch_size = options.delete_batch_size.max(1);
        let mut pending: Vec<NodeHash> = Vec::with_capacity(batch_size.min(DEFAULT_DELETE_BATCH_SIZE));
        let mut total = 0u64;
        let mut deleted = 0u64;

        self.nodes.for_each_node(&mut |hash| {
            total += 1;
            if marked.contains(&hash)? {
                return Ok(());
            }
            if let Some(pinned) = pinned {
                if pinned.read(&hash)?.is_none() {
                    return Ok(());
                }
            }
            if self.nodes.was_written(&hash) {
                return Ok(());
            }
            if dry_run {
                deleted += 1;
                return Ok(());
            }
            pending.push(hash);
            if pending.len() >= batch_size {
                deleted += self.delete_batch(&mut pending)?;
                options.report_progress(deleted);
            }
            Ok(())
        })?;
        if !pending.is_empty() {
            deleted += self.delete_batch(&mut pending)?;
            options.report_progress(deleted);
        }
        Ok((total, deleted))
    }

    /// Release the references of every version the policy drops
    ///
    /// Every retained version must carry a counted marker, otherwise the run
    /// fails with `Policy` before writing anything: an uncounted version may
    /// use nodes whose counts do not include it. Pruned versions without a
    /// marker leave the index without releasing anything. Released versions
    /// always leave the index, so a later run cannot release them twice.
    pub fn run_refcount_collect(&self, policy: &RetentionPolicy, options: &GcOptions) -> Result<GcReport> {
        let started = Instant::now();
        let retention = policy.resolve(self.roots)?;
        for version in retention.retained.keys() {
            if !self.roots.is_counted(*version)? {
                return Err(Error::Policy(format!(
                    "retained version {} was committed without reference counts, use mark-sweep",
                    version
                )));
            }
        }
        let total = self.nodes.node_count()?;
        let mut released = Vec::with_capacity(retention.pruned.len());
        for (version, root) in &retention.pruned {
            if self.roots.is_counted(*version)? {
                released.push(*root);
            }
        }
        debug!(
            released = released.len(),
            uncounted = retention.pruned.len() - released.len(),
            "releasing pruned versions"
        );
        let tracker = self.refcount_tracker();

        let deleted = if options.dry_run {
            tracker.decrement_roots(&released, true)?.len() as u64
        } else {
            let mut deleted = 0u64;
            self.nodes.with_batch(&mut || {
                deleted = tracker.decrement_roots(&released, false)?.len() as u64;
                self.drop_versions(&retention)
            })?;
            options.report_progress(deleted);
            deleted
        };

        Ok(GcReport {
            marked: 0,
            total,
            deleted,
            duration_millis: elapsed_millis(started),
        })
    }

    /// Mark the roots of versions committed since `retention` was resolved
    fn mark_late_roots(&self, retention: &Retention, set: &mut dyn MarkSet) -> Result<u64> {
        let late: Vec<NodeHash> = self
            .roots
            .list_all()?
            .into_iter()
            .filter(|(version, _)| !retention.retained.contains_key(version) && !retention.pruned.contains_key(version))
            .map(|(_, root)| root)
            .collect();
        if late.is_empty() {
            return Ok(0);
        }
        debug!(roots = late.len(), "marking roots committed during the mark");
        mark(&LiveNodes(self.nodes), self.refs, &late, set)
    }

    fn delete_batch(&self, pending: &mut Vec<NodeHash>) -> Result<u64> {
        let n = self.nodes.delete_unwritten(pending)?;
        debug!(deleted = n, rewritten = pending.len() as u64 - n, "swept batch");
        pending.clear();
        Ok(n)
    }

    fn uncount_versions(&self, retention: &Retention) -> Result<()> {
        self.roots.with_batch(&mut || {
            for version in retention.pruned.keys() {
                self.roots.set_counted(*version, false)?;
            }
            Ok(())
        })
    }

    fn drop_versions(&self, retention: &Retention) -> Result<()> {
        self.roots.with_batch(&mut || {
            for version in retention.pruned.keys() {
                self.roots.delete_version(*version)?;
            }
            Ok(())
        })?;
        debug!(versions = retention.pruned.len(), "dropped pruned versions from index");
        Ok(())
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
