use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::observability::metrics::ChannelCounts;
use crate::{ClaimToken, JobId, JobPriority, QueueError, QueueResult};

/// Work item held by a channel. Refers to the job record by id only.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: Value,
}

impl QueueEntry {
    pub fn new(job_id: JobId, job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            payload,
        }
    }
}

/// An entry claimed by a worker, hidden from other claimants until it is
/// acknowledged, returned or its visibility deadline passes.
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub token: ClaimToken,
}

#[derive(Debug)]
struct Delayed {
    release_at: Instant,
    seq: u64,
    entry: QueueEntry,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.release_at, self.seq).cmp(&(other.release_at, other.seq))
    }
}

#[derive(Debug)]
struct InFlight {
    token: ClaimToken,
    deadline: Instant,
    /// Claim order, breaks deadline ties on reclaim
    seq: u64,
    entry: QueueEntry,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: VecDeque<QueueEntry>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    in_flight: HashMap<JobId, InFlight>,
    members: HashSet<JobId>,
    completed: u64,
    failed: u64,
    seq: u64,
}

impl ChannelState {
    /// Move delayed entries whose release time has passed onto the ready list
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(next)) = self.delayed.peek() {
            if next.release_at > now {
                break;
            }
            if let Some(Reverse(due)) = self.delayed.pop() {
                self.ready.push_back(due.entry);
            }
        }
    }

    fn take_claim(&mut self, job_id: &JobId, token: &ClaimToken) -> QueueResult<QueueEntry> {
        match self.in_flight.get(job_id) {
            Some(in_flight) if in_flight.token == *token => {}
            _ => return Err(QueueError::InvalidClaimToken(job_id.to_string())),
        }
        self.in_flight
            .remove(job_id)
            .map(|in_flight| in_flight.entry)
            .ok_or_else(|| QueueError::InvalidClaimToken(job_id.to_string()))
    }
}

/// FIFO channel for one priority class
#[derive(Debug)]
pub struct Channel {
    priority: JobPriority,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub fn new(priority: JobPriority) -> Self {
        Self {
            priority,
            state: Mutex::new(ChannelState::default()),
        }
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    /// Append an entry. A job id already present in the channel is rejected.
    pub fn enqueue(&self, entry: QueueEntry) -> QueueResult<()> {
        let mut state = self.state.lock();
        if !state.members.insert(entry.job_id.clone()) {
            return Err(QueueError::DuplicateJob(entry.job_id.to_string()));
        }
        state.ready.push_back(entry);
        Ok(())
    }

    /// Claim the oldest ready entry
    pub fn claim(&self, visibility_timeout: Duration) -> Option<ClaimedEntry> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.promote_due(now);

        let entry = state.ready.pop_front()?;
        let token = ClaimToken::new();
        state.seq += 1;
        let seq = state.seq;
        state.in_flight.insert(
            entry.job_id.clone(),
            InFlight {
                token: token.clone(),
                deadline: now + visibility_timeout,
                seq,
                entry: entry.clone(),
            },
        );

        Some(ClaimedEntry {
            job_id: entry.job_id,
            job_type: entry.job_type,
            payload: entry.payload,
            priority: self.priority,
            token,
        })
    }

    /// Acknowledge a successful execution and remove the entry
    pub fn ack(&self, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.take_claim(job_id, token)?;
        state.members.remove(job_id);
        state.completed += 1;
        Ok(())
    }

    /// Return a claimed entry; it becomes claimable again after `delay`
    pub fn retry(&self, job_id: &JobId, token: &ClaimToken, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock();
        let entry = state.take_claim(job_id, token)?;
        if delay.is_zero() {
            state.ready.push_back(entry);
        } else {
            state.seq += 1;
            let seq = state.seq;
            state.delayed.push(Reverse(Delayed {
                release_at: Instant::now() + delay,
                seq,
                entry,
            }));
        }
        Ok(())
    }

    /// Remove a claimed entry whose job failed for good
    pub fn discard(&self, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.take_claim(job_id, token)?;
        state.members.remove(job_id);
        state.failed += 1;
        Ok(())
    }

    /// Put a claimed entry back at the head of the channel without counting
    /// an outcome, used when its record changed under the claimant
    pub fn release(&self, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        let mut state = self.state.lock();
        let entry = state.take_claim(job_id, token)?;
        state.ready.push_front(entry);
        Ok(())
    }

    /// Remove a claimed entry without counting an outcome, used when the
    /// record turned out to be terminal already
    pub fn drop_claim(&self, job_id: &JobId, token: &ClaimToken) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.take_claim(job_id, token)?;
        state.members.remove(job_id);
        Ok(())
    }

    /// Make claims whose visibility deadline passed claimable again, ahead of
    /// newer work. Returns the reclaimed job ids.
    pub fn reclaim_expired(&self, now: Instant) -> Vec<JobId> {
        let mut state = self.state.lock();
        let mut expired: Vec<(Instant, u64, JobId)> = state
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.deadline <= now)
            .map(|(job_id, in_flight)| (in_flight.deadline, in_flight.seq, job_id.clone()))
            .collect();
        expired.sort_by_key(|(deadline, seq, _)| (*deadline, *seq));

        // pushed to the front newest first, so the oldest claim ends up at the head
        for (_, _, job_id) in expired.iter().rev() {
            if let Some(in_flight) = state.in_flight.remove(job_id) {
                state.ready.push_front(in_flight.entry);
            }
        }
        expired.into_iter().map(|(_, _, job_id)| job_id).collect()
    }

    /// Earliest release time among delayed entries
    pub fn next_release(&self) -> Option<Instant> {
        self.state
            .lock()
            .delayed
            .peek()
            .map(|Reverse(next)| next.release_at)
    }

    pub fn has_ready(&self) -> bool {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        !state.ready.is_empty()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.state.lock().members.contains(job_id)
    }

    pub fn counts(&self) -> ChannelCounts {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        ChannelCounts {
            waiting: state.ready.len() as u64,
            delayed: state.delayed.len() as u64,
            active: state.in_flight.len() as u64,
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Expire a claim immediately (test helper)
    pub fn force_visibility_expiry(&self, job_id: &JobId) {
        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(job_id) {
            in_flight.deadline = Instant::now();
        }
    }
}
