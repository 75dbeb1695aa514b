//! Replicated text - one participant's copy of the room document.
//!
//! The structure is an RGA tree: every character record hangs off the
//! record it was inserted after, siblings are kept in descending [`OpId`]
//! order, and the document is the pre-order walk of that tree with
//! tombstones skipped. Since the tree shape and the sibling order depend
//! only on the set of records, any delivery order converges to the same
//! text.
//!
//! The local counter behaves as a Lamport clock, so a fresh local insert
//! always sorts before the existing siblings of its predecessor and lands
//! exactly where the user typed it.

use crate::diff::diff;
use crate::error::{ReplicaError, Result};
use crate::id::{OpId, ReplicaId};
use crate::op::{Operation, TextEdit};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Outcome of integrating a remote operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The operation changed local state.
    Integrated,
    /// The operation was already known; nothing changed.
    Duplicate,
}

/// Handle returned by [`TextReplica::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&str) + Send>;

/// A character record in the tree.
#[derive(Clone, Debug)]
struct Record {
    id: OpId,
    ch: char,
    /// The record this one was inserted after.
    after: Option<OpId>,
    /// Records inserted directly after this one, descending by id.
    children: Vec<OpId>,
    deleted: bool,
}

/// Replicated plain text owned by a single session.
pub struct TextReplica {
    replica_id: ReplicaId,
    /// Next counter to mint; never below any counter seen so far.
    counter: u64,
    records: HashMap<OpId, Record>,
    /// Records inserted at the document start, descending by id.
    roots: Vec<OpId>,
    visible: usize,
    /// Set once any local or remote operation has been applied.
    live: bool,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl TextReplica {
    /// Create an empty replica.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            counter: 0,
            records: HashMap::new(),
            roots: Vec::new(),
            visible: 0,
            live: false,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    /// The counter the next local insert will carry.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.visible
    }

    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }

    /// Number of records, tombstones included.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: &OpId) -> bool {
        self.records.contains_key(id)
    }

    /// Whether any live (non-snapshot) operation has been applied.
    pub fn has_live_operations(&self) -> bool {
        self.live
    }

    /// Render the visible text.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.visible);
        out.extend(self.walk().filter(|r| !r.deleted).map(|r| r.ch));
        out
    }

    /// Register a callback fired with the rendered text after every mutation.
    pub fn subscribe(&mut self, observer: impl FnMut(&str) + Send + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        before != self.observers.len()
    }

    /// Apply a wholesale replacement of the text.
    ///
    /// `old` is the text the editor believed it was replacing. When a remote
    /// merge has landed in between, the diff is taken against the current
    /// text instead so the resulting state is exactly `new`.
    pub fn apply_local(&mut self, old: &str, new: &str) -> Vec<Operation> {
        let current = self.to_text();
        if old != current {
            debug!(
                replica = %self.replica_id,
                "local base is stale, diffing against current text"
            );
        }

        let mut ops = Vec::new();
        for edit in diff(&current, new) {
            match edit {
                TextEdit::Delete { index, len } => ops.extend(self.delete_inner(index, len)),
                TextEdit::Insert { index, text } => ops.extend(self.insert_inner(index, &text)),
            }
        }

        if !ops.is_empty() {
            self.notify();
        }
        ops
    }

    /// Insert `text` at visible position `index`.
    pub fn insert(&mut self, index: usize, text: &str) -> Result<Vec<Operation>> {
        if index > self.visible {
            return Err(ReplicaError::IndexOutOfBounds {
                index,
                length: self.visible,
            });
        }
        let ops = self.insert_inner(index, text);
        if !ops.is_empty() {
            self.notify();
        }
        Ok(ops)
    }

    /// Delete `len` visible characters starting at `index`.
    pub fn delete(&mut self, index: usize, len: usize) -> Result<Vec<Operation>> {
        if !matches!(index.checked_add(len), Some(end) if end <= self.visible) {
            return Err(ReplicaError::IndexOutOfBounds {
                index: index.saturating_add(len),
                length: self.visible,
            });
        }
        let ops = self.delete_inner(index, len);
        if !ops.is_empty() {
            self.notify();
        }
        Ok(ops)
    }

    /// Integrate an operation received from another replica.
    pub fn apply_remote(&mut self, op: &Operation) -> Result<Applied> {
        let applied = self.integrate_remote(op)?;
        if applied == Applied::Integrated {
            self.live = true;
            self.notify();
        }
        Ok(applied)
    }

    /// Replace a state that holds no live operation with a peer's full log.
    ///
    /// Used when a member that only knows the durable snapshot meets the
    /// room's live state. Returns the operations that could not be
    /// integrated (their predecessor or target is missing from `ops`).
    pub fn adopt(&mut self, ops: &[Operation]) -> Result<Vec<Operation>> {
        if self.live {
            return Err(ReplicaError::LiveState);
        }

        self.records.clear();
        self.roots.clear();
        self.visible = 0;

        let mut rejected = Vec::new();
        for op in ops {
            if self.integrate_remote(op).is_err() {
                rejected.push(op.clone());
            }
        }
        self.live = true;
        self.notify();
        Ok(rejected)
    }

    /// Replace the whole state with the text of a durable snapshot.
    ///
    /// Only allowed before any live operation was applied. Records are
    /// minted under [`ReplicaId::seed`], so replicas seeding from the same
    /// text agree on every id.
    pub fn snapshot_load(&mut self, text: &str) -> Result<()> {
        if self.live {
            return Err(ReplicaError::LiveState);
        }

        self.records.clear();
        self.roots.clear();
        self.visible = 0;

        let seed = ReplicaId::seed(text);
        let mut after: Option<OpId> = None;
        for (counter, ch) in (0u64..).zip(text.chars()) {
            let id = OpId::new(seed.clone(), counter);
            self.integrate(id.clone(), after, ch);
            after = Some(id);
        }
        self.counter = self.counter.max(self.visible as u64);

        self.notify();
        Ok(())
    }

    /// Every record as operations, in an order any fresh replica can apply.
    pub fn export(&self) -> Vec<Operation> {
        let mut inserts = Vec::with_capacity(self.records.len());
        let mut deletes = Vec::new();
        for record in self.walk() {
            inserts.push(Operation::insert(
                record.id.clone(),
                record.after.clone(),
                record.ch,
            ));
            if record.deleted {
                deletes.push(Operation::delete(record.id.clone()));
            }
        }
        inserts.extend(deletes);
        inserts
    }

    fn integrate_remote(&mut self, op: &Operation) -> Result<Applied> {
        match op {
            Operation::Insert { id, after, ch } => {
                if let Some(existing) = self.records.get(id) {
                    return if existing.ch == *ch {
                        Ok(Applied::Duplicate)
                    } else {
                        Err(ReplicaError::ConflictingInsert(id.clone()))
                    };
                }
                if let Some(after) = after {
                    if !self.records.contains_key(after) {
                        return Err(ReplicaError::UnknownPredecessor(after.clone()));
                    }
                }

                self.counter = self.counter.max(id.counter.saturating_add(1));
                self.integrate(id.clone(), after.clone(), *ch);
                Ok(Applied::Integrated)
            }
            Operation::Delete { target } => match self.records.get_mut(target) {
                None => Err(ReplicaError::UnknownTarget(target.clone())),
                Some(record) if record.deleted => Ok(Applied::Duplicate),
                Some(record) => {
                    record.deleted = true;
                    self.visible -= 1;
                    Ok(Applied::Integrated)
                }
            },
        }
    }

    fn next_id(&mut self) -> OpId {
        let id = OpId::new(self.replica_id.clone(), self.counter);
        self.counter += 1;
        id
    }

    fn insert_inner(&mut self, index: usize, text: &str) -> Vec<Operation> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut after = match index.min(self.visible) {
            0 => None,
            n => self.visible_id_at(n - 1),
        };

        let mut ops = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let id = self.next_id();
            self.integrate(id.clone(), after.clone(), ch);
            ops.push(Operation::insert(id.clone(), after, ch));
            after = Some(id);
        }
        self.live = true;
        ops
    }

    fn delete_inner(&mut self, index: usize, len: usize) -> Vec<Operation> {
        let targets: Vec<OpId> = self
            .walk()
            .filter(|r| !r.deleted)
            .skip(index)
            .take(len)
            .map(|r| r.id.clone())
            .collect();

        let mut ops = Vec::with_capacity(targets.len());
        for id in targets {
            if let Some(record) = self.records.get_mut(&id) {
                record.deleted = true;
                self.visible -= 1;
                ops.push(Operation::delete(id));
            }
        }
        if !ops.is_empty() {
            self.live = true;
        }
        ops
    }

    /// Link a new record under its predecessor. The predecessor must exist.
    fn integrate(&mut self, id: OpId, after: Option<OpId>, ch: char) {
        let siblings = match &after {
            None => &mut self.roots,
            Some(parent) => match self.records.get_mut(parent) {
                Some(record) => &mut record.children,
                None => return,
            },
        };

        // Descending by id: the newest concurrent insert comes first
        let pos = siblings
            .iter()
            .position(|c| c < &id)
            .unwrap_or(siblings.len());
        siblings.insert(pos, id.clone());

        self.records.insert(
            id.clone(),
            Record {
                id,
                ch,
                after,
                children: Vec::new(),
                deleted: false,
            },
        );
        self.visible += 1;
    }

    fn visible_id_at(&self, index: usize) -> Option<OpId> {
        self.walk()
            .filter(|r| !r.deleted)
            .nth(index)
            .map(|r| r.id.clone())
    }

    /// Pre-order walk over all records, tombstones included.
    fn walk(&self) -> Walk<'_> {
        Walk {
            replica: self,
            stack: self.roots.iter().rev().collect(),
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let text = self.to_text();
        for (_, observer) in self.observers.iter_mut() {
            observer(&text);
        }
    }
}

/// Iterator for traversing records in document order.
struct Walk<'a> {
    replica: &'a TextReplica,
    stack: Vec<&'a OpId>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Record;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(record) = self.replica.records.get(id) {
                // Push children in reverse so the first child is visited next
                self.stack.extend(record.children.iter().rev());
                return Some(record);
            }
        }
        None
    }
}

impl fmt::Debug for TextReplica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextReplica")
            .field("replica_id", &self.replica_id)
            .field("counter", &self.counter)
            .field("records", &self.records.len())
            .field("visible", &self.visible)
            .field("live", &self.live)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl fmt::Display for TextReplica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
