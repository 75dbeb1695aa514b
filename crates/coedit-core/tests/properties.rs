//! Property-based tests for the replica and the diff.
//!
//! These cover the guarantees a room relies on:
//!  - Diff correctness: applying diff(old, new) to old yields new
//!  - Local-first: after apply_local(old, new) the replica reads new
//!  - Convergence: same operation set, any order, same text
//!  - Idempotence: applying an operation twice equals applying it once

use coedit_core::{apply_edits, codec, diff, Operation, ReplicaError, TextReplica};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Apply operations in the given order, re-delivering the ones whose
/// dependencies have not arrived yet until nothing makes progress.
fn deliver(replica: &mut TextReplica, mut pending: Vec<Operation>) {
    loop {
        let before = pending.len();
        let mut retry = Vec::new();
        for op in pending {
            match replica.apply_remote(&op) {
                Ok(_) => {}
                Err(ReplicaError::UnknownPredecessor(_)) | Err(ReplicaError::UnknownTarget(_)) => {
                    retry.push(op)
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        if retry.is_empty() || retry.len() == before {
            assert!(retry.is_empty(), "operations never became applicable");
            return;
        }
        pending = retry;
    }
}

fn text_strategy() -> impl Strategy<Value = String> {
    "[a-cé ]{0,12}"
}

/// (replica, is_insert, position seed, char)
fn edit_strategy() -> impl Strategy<Value = Vec<(usize, bool, usize, char)>> {
    prop::collection::vec(
        (0usize..3, any::<bool>(), 0usize..64, prop::char::range('a', 'e')),
        1..30,
    )
}

fn local_edit(replica: &mut TextReplica, insert: bool, pos: usize, ch: char) -> Vec<Operation> {
    let len = replica.len();
    if insert || len == 0 {
        replica.insert(pos % (len + 1), &ch.to_string()).unwrap()
    } else {
        replica.delete(pos % len, 1).unwrap()
    }
}

proptest! {
    #[test]
    fn diff_transforms_old_into_new(old in text_strategy(), new in text_strategy()) {
        let edits = diff(&old, &new);
        prop_assert_eq!(apply_edits(&old, &edits), new);
    }

    #[test]
    fn apply_local_reads_back_immediately(steps in prop::collection::vec(text_strategy(), 1..8)) {
        let mut replica = TextReplica::new("local");
        let mut shown = String::new();
        for next in steps {
            replica.apply_local(&shown, &next);
            prop_assert_eq!(replica.to_text(), next.clone());
            shown = next;
        }
    }

    #[test]
    fn replicas_converge_under_any_order(edits in edit_strategy(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut replicas: Vec<TextReplica> =
            ["A", "B", "C"].iter().map(|id| TextReplica::new(*id)).collect();
        let mut logs: Vec<Vec<Operation>> = vec![Vec::new(); 3];

        // Every replica edits concurrently, never seeing the others
        for (who, insert, pos, ch) in edits {
            logs[who].extend(local_edit(&mut replicas[who], insert, pos, ch));
        }

        for (idx, replica) in replicas.iter_mut().enumerate() {
            let mut incoming: Vec<Operation> = logs
                .iter()
                .enumerate()
                .filter(|(origin, _)| *origin != idx)
                .flat_map(|(_, ops)| ops.iter().cloned())
                .collect();
            incoming.shuffle(&mut rng);
            deliver(replica, incoming);
        }

        let text = replicas[0].to_text();
        prop_assert_eq!(replicas[1].to_text(), text.clone());
        prop_assert_eq!(replicas[2].to_text(), text);
    }

    #[test]
    fn causal_rounds_converge(rounds in prop::collection::vec(edit_strategy(), 1..4), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut replicas: Vec<TextReplica> =
            ["A", "B", "C"].iter().map(|id| TextReplica::new(*id)).collect();
        let mut everything: Vec<Operation> = Vec::new();

        for edits in rounds {
            let mut logs: Vec<Vec<Operation>> = vec![Vec::new(); 3];
            for (who, insert, pos, ch) in edits {
                logs[who].extend(local_edit(&mut replicas[who], insert, pos, ch));
            }
            for (idx, replica) in replicas.iter_mut().enumerate() {
                let mut incoming: Vec<Operation> = logs
                    .iter()
                    .enumerate()
                    .filter(|(origin, _)| *origin != idx)
                    .flat_map(|(_, ops)| ops.iter().cloned())
                    .collect();
                incoming.shuffle(&mut rng);
                deliver(replica, incoming);
            }
            everything.extend(logs.into_iter().flatten());
        }

        let text = replicas[0].to_text();
        prop_assert_eq!(replicas[1].to_text(), text.clone());
        prop_assert_eq!(replicas[2].to_text(), text.clone());

        // A late joiner that receives the whole history in a random order agrees too
        everything.shuffle(&mut rng);
        let mut late = TextReplica::new("D");
        deliver(&mut late, everything);
        prop_assert_eq!(late.to_text(), text);
    }

    #[test]
    fn remote_apply_is_idempotent(edits in edit_strategy()) {
        let mut origin = TextReplica::new("A");
        let mut ops = Vec::new();
        for (_, insert, pos, ch) in edits {
            ops.extend(local_edit(&mut origin, insert, pos, ch));
        }

        let mut once = TextReplica::new("B");
        let mut twice = TextReplica::new("C");
        for op in &ops {
            once.apply_remote(op).unwrap();
            twice.apply_remote(op).unwrap();
            twice.apply_remote(op).unwrap();
        }
        prop_assert_eq!(once.to_text(), twice.to_text());
        prop_assert_eq!(once.record_count(), twice.record_count());
        prop_assert_eq!(once.to_text(), origin.to_text());
    }

    #[test]
    fn frames_survive_the_codec(edits in edit_strategy()) {
        let mut origin = TextReplica::new("A");
        let mut peer = TextReplica::new("B");
        for (_, insert, pos, ch) in edits {
            for op in local_edit(&mut origin, insert, pos, ch) {
                let decoded = codec::decode(&codec::encode(&op)).unwrap();
                peer.apply_remote(&decoded).unwrap();
            }
        }
        prop_assert_eq!(peer.to_text(), origin.to_text());
    }
}
