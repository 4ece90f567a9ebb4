//! In-process transport: one thread per rank.
//!
//! Ranks exchange buffers over `std::sync::mpsc` channels, one per ordered
//! rank pair. The collective byte-count exchange writes each rank's row into
//! a shared matrix between two rendezvous, so every rank reads the same
//! complete matrix and nobody overwrites it before everyone has read it.
//!
//! Sends queued for one destination during a round are flushed as a single
//! message, so a rank receives at most one message per peer per round.
//!
//! A rank that drops its transport, after an error or at the end of the run,
//! leaves the group. Ranks waiting in a rendezvous it will never reach fail
//! with [`TransportError::Aborted`], and receives from it fail once its
//! queued messages are drained.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracking::{Transport, TransportError};

fn poisoned<T>(e: PoisonError<T>) -> TransportError {
    TransportError::Collective(e.to_string())
}

#[derive(Debug, Default)]
struct Rendezvous {
    arrived: usize,
    generation: u64,
    departed: Option<usize>,
}

#[derive(Debug)]
struct Collective {
    n_ranks: usize,
    state: Mutex<Rendezvous>,
    turn: Condvar,
    counts: Mutex<Vec<Vec<usize>>>,
}

impl Collective {
    /// Block until every rank has arrived. Fails once any rank has left.
    fn wait(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(rank) = state.departed {
            return Err(TransportError::Aborted(rank));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.n_ranks {
            state.arrived = 0;
            state.generation += 1;
            self.turn.notify_all();
            return Ok(());
        }
        // A completed rendezvous wins over a later departure
        while state.generation == generation {
            if let Some(rank) = state.departed {
                return Err(TransportError::Aborted(rank));
            }
            state = self.turn.wait(state).map_err(poisoned)?;
        }
        Ok(())
    }

    fn leave(&self, rank: usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.departed.get_or_insert(rank);
        self.turn.notify_all();
    }
}

/// One rank's end of a group of threads exchanging particles.
#[derive(Debug)]
pub struct ThreadTransport {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
    pending: Vec<Vec<Vec<u8>>>,
    collective: Arc<Collective>,
}

impl ThreadTransport {
    /// Create the transports of `n_ranks` ranks. Element `r` belongs to rank
    /// `r` and is meant to be moved into that rank's thread.
    pub fn group(n_ranks: usize) -> Vec<ThreadTransport> {
        let collective = Arc::new(Collective {
            n_ranks,
            state: Mutex::new(Rendezvous::default()),
            turn: Condvar::new(),
            counts: Mutex::new(vec![vec![0; n_ranks]; n_ranks]),
        });

        // channels[from][to]
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = (0..n_ranks).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> = (0..n_ranks)
            .map(|_| (0..n_ranks).map(|_| None).collect())
            .collect();
        for (from, row) in senders.iter_mut().enumerate() {
            for to_receivers in receivers.iter_mut() {
                let (tx, rx) = channel();
                row.push(tx);
                to_receivers[from] = Some(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadTransport {
                rank,
                senders,
                receivers: receivers.into_iter().flatten().collect(),
                pending: vec![Vec::new(); n_ranks],
                collective: Arc::clone(&collective),
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> Result<(), TransportError> {
        if rank >= self.senders.len() {
            return Err(TransportError::BadRank {
                rank,
                n_ranks: self.senders.len(),
            });
        }
        Ok(())
    }
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.senders.len()
    }

    fn send(&mut self, to: usize, data: Vec<u8>) -> Result<(), TransportError> {
        self.check_rank(to)?;
        self.pending[to].push(data);
        Ok(())
    }

    fn finished_sends(&mut self) -> Result<Vec<Vec<usize>>, TransportError> {
        let mut row = vec![0; self.senders.len()];
        for (to, queued) in self.pending.iter_mut().enumerate() {
            if queued.is_empty() {
                continue;
            }
            let data: Vec<u8> = queued.drain(..).flatten().collect();
            row[to] = data.len();
            self.senders[to]
                .send(data)
                .map_err(|_| TransportError::Disconnected(to))?;
        }

        {
            let mut counts = self.collective.counts.lock().map_err(poisoned)?;
            counts[self.rank] = row;
        }
        self.collective.wait()?;
        let all = self.collective.counts.lock().map_err(poisoned)?.clone();
        self.collective.wait()?;

        tracing::trace!("Rank {} count matrix: {:?}", self.rank, all);
        Ok(all)
    }

    fn receive(&mut self, from: usize) -> Result<Vec<u8>, TransportError> {
        self.check_rank(from)?;
        // One message per round and pair; a faster peer may already have
        // queued the next round behind it.
        self.receivers[from]
            .recv()
            .map_err(|_| TransportError::Disconnected(from))
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        self.collective.leave(self.rank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_group_ranks() {
        let group = ThreadTransport::group(3);
        assert_eq!(group.len(), 3);
        for (r, t) in group.iter().enumerate() {
            assert_eq!(t.rank(), r);
            assert_eq!(t.n_ranks(), 3);
        }
    }

    #[test]
    fn test_bad_rank() {
        let mut group = ThreadTransport::group(2);
        assert!(matches!(
            group[0].send(2, vec![1]),
            Err(TransportError::BadRank { rank: 2, n_ranks: 2 })
        ));
    }

    #[test]
    fn test_ring_exchange() {
        let n = 4;
        let handles: Vec<_> = ThreadTransport::group(n)
            .into_iter()
            .map(|mut t| {
                thread::spawn(move || {
                    let me = t.rank();
                    let next = (me + 1) % n;
                    let prev = (me + n - 1) % n;
                    t.send(next, vec![me as u8; me + 1]).unwrap();
                    t.send(next, vec![255]).unwrap();
                    let counts = t.finished_sends().unwrap();
                    let received = t.receive(prev).unwrap();

                    // Second round: nothing sent
                    let quiet = t.finished_sends().unwrap();
                    (me, counts, received, quiet)
                })
            })
            .collect();

        for h in handles {
            let (me, counts, received, quiet) = h.join().unwrap();
            let prev = (me + n - 1) % n;
            let mut expected = vec![prev as u8; prev + 1];
            expected.push(255);
            assert_eq!(received, expected);
            for (from, row) in counts.iter().enumerate() {
                for (to, &bytes) in row.iter().enumerate() {
                    let want = if to == (from + 1) % n { from + 2 } else { 0 };
                    assert_eq!(bytes, want, "counts[{}][{}] on rank {}", from, to, me);
                }
            }
            assert!(quiet.iter().flatten().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_failed_rank_releases_waiting_ranks() {
        let mut group = ThreadTransport::group(3);
        let failing = group.remove(0);

        let handles: Vec<_> = group
            .into_iter()
            .map(|mut t| {
                thread::spawn(move || t.finished_sends())
            })
            .collect();

        // Rank 0 gives up without joining the exchange
        drop(failing);
        for h in handles {
            let result = h.join().unwrap();
            assert!(matches!(result, Err(TransportError::Aborted(0))));
        }
    }
}
