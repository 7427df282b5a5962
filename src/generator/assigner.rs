use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use uuid::Uuid;

use crate::runtime::Executor;
use crate::stream::StreamChannel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignError {
    #[error("ID_ENCRYPTOR_NOT_DONE_WITH_EXISTING_ENCRYPTION")]
    Busy,
    #[error("surrogate pair queue failed")]
    QueueBroken,
}

/// One plaintext ID and the opaque 128-bit surrogate assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrogatePair {
    pub plaintext: String,
    pub surrogate: Uuid,
}

impl SurrogatePair {
    /// 32-char lowercase hex form, the on-disk representation.
    pub fn surrogate_hex(&self) -> String {
        self.surrogate.simple().to_string()
    }
}

/// Assigns a fresh random surrogate to every plaintext of one run.
///
/// Two workers cooperate on the CPU executor: the assignment worker drains
/// the caller's plaintext stream into the internal pair queue, and the
/// streaming worker forwards pairs onto the caller's consumer stream. Both
/// re-submit themselves to the executor between drains so neither
/// monopolizes a worker thread. A run is accepted only when the previous
/// one has fully finished on both sides.
///
/// Surrogates of one run are collision-free: tokens are drawn until unused
/// within the run's own set.
pub struct SurrogateAssigner {
    cpu: Arc<Executor>,
    pair_tx: Sender<SurrogatePair>,
    pair_rx: Receiver<SurrogatePair>,
    done_assigning: Arc<AtomicBool>,
    done_streaming: Arc<AtomicBool>,
}

impl SurrogateAssigner {
    pub fn new(cpu: Arc<Executor>) -> Self {
        // The pair queue is bounded by the size of one run (the producer
        // stream is finite), so the channel itself is unbounded.
        let (pair_tx, pair_rx) = crossbeam_channel::unbounded();
        Self {
            cpu,
            pair_tx,
            pair_rx,
            done_assigning: Arc::new(AtomicBool::new(true)),
            done_streaming: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Starts draining `plaintexts`. The stream is finished with the run's
    /// terminal status once the producer marks it done and the queue is
    /// fully drained.
    pub fn assign(&self, plaintexts: StreamChannel<String, AssignError>) -> Result<(), AssignError> {
        if !self.done_assigning.load(Ordering::SeqCst) || !self.done_streaming.load(Ordering::SeqCst)
        {
            return Err(AssignError::Busy);
        }
        self.done_assigning.store(false, Ordering::SeqCst);
        self.done_streaming.store(false, Ordering::SeqCst);

        let cpu = self.cpu.clone();
        let pair_tx = self.pair_tx.clone();
        let done = self.done_assigning.clone();
        self.cpu
            .spawn(move || assign_step(cpu, plaintexts, pair_tx, HashSet::new(), done));
        Ok(())
    }

    /// Starts forwarding assigned pairs onto `pairs`. Marks the stream done
    /// and finishes it once assignment has completed and the queue is empty.
    pub fn stream_surrogates(&self, pairs: StreamChannel<SurrogatePair, AssignError>) {
        let cpu = self.cpu.clone();
        let pair_rx = self.pair_rx.clone();
        let done_assigning = self.done_assigning.clone();
        let done_streaming = self.done_streaming.clone();
        self.cpu
            .spawn(move || stream_step(cpu, pairs, pair_rx, done_assigning, done_streaming));
    }

    pub fn is_idle(&self) -> bool {
        self.done_assigning.load(Ordering::SeqCst) && self.done_streaming.load(Ordering::SeqCst)
    }
}

fn fresh_token(used: &mut HashSet<Uuid>) -> Uuid {
    let mut token = Uuid::new_v4();
    while !used.insert(token) {
        token = Uuid::new_v4();
    }
    token
}

fn drain_plaintexts(
    plaintexts: &StreamChannel<String, AssignError>,
    pair_tx: &Sender<SurrogatePair>,
    used: &mut HashSet<Uuid>,
) -> Result<(), AssignError> {
    while let Some(plaintext) = plaintexts.try_next() {
        let pair = SurrogatePair { plaintext, surrogate: fresh_token(used) };
        if pair_tx.send(pair).is_err() {
            return Err(AssignError::QueueBroken);
        }
    }
    Ok(())
}

fn assign_step(
    cpu: Arc<Executor>,
    plaintexts: StreamChannel<String, AssignError>,
    pair_tx: Sender<SurrogatePair>,
    mut used: HashSet<Uuid>,
    done: Arc<AtomicBool>,
) {
    if let Err(e) = drain_plaintexts(&plaintexts, &pair_tx, &mut used) {
        done.store(true, Ordering::SeqCst);
        plaintexts.finish(Err(e));
        return;
    }
    if plaintexts.is_marked_done() {
        // An item may land between the empty poll and the done check; drain
        // once more before declaring the run complete.
        if let Err(e) = drain_plaintexts(&plaintexts, &pair_tx, &mut used) {
            done.store(true, Ordering::SeqCst);
            plaintexts.finish(Err(e));
            return;
        }
        done.store(true, Ordering::SeqCst);
        plaintexts.finish(Ok(()));
    } else {
        let cpu2 = cpu.clone();
        cpu.spawn(move || assign_step(cpu2, plaintexts, pair_tx, used, done));
    }
}

fn forward_pairs(
    pairs: &StreamChannel<SurrogatePair, AssignError>,
    pair_rx: &Receiver<SurrogatePair>,
) -> Result<(), AssignError> {
    while let Ok(pair) = pair_rx.try_recv() {
        if pairs.try_push(pair).is_err() {
            return Err(AssignError::QueueBroken);
        }
    }
    Ok(())
}

fn stream_step(
    cpu: Arc<Executor>,
    pairs: StreamChannel<SurrogatePair, AssignError>,
    pair_rx: Receiver<SurrogatePair>,
    done_assigning: Arc<AtomicBool>,
    done_streaming: Arc<AtomicBool>,
) {
    if let Err(e) = forward_pairs(&pairs, &pair_rx) {
        done_streaming.store(true, Ordering::SeqCst);
        pairs.mark_done();
        pairs.finish(Err(e));
        return;
    }
    if done_assigning.load(Ordering::SeqCst) {
        if let Err(e) = forward_pairs(&pairs, &pair_rx) {
            done_streaming.store(true, Ordering::SeqCst);
            pairs.mark_done();
            pairs.finish(Err(e));
            return;
        }
        done_streaming.store(true, Ordering::SeqCst);
        pairs.mark_done();
        pairs.finish(Ok(()));
    } else {
        let cpu2 = cpu.clone();
        cpu.spawn(move || stream_step(cpu2, pairs, pair_rx, done_assigning, done_streaming));
    }
}
