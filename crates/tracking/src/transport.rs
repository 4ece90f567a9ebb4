//! Point-to-point and collective primitives used by the transfer protocol.

use crate::error::TransportError;

/// Message passing between the ranks of a decomposed run.
///
/// Sends are buffered until [`finished_sends`](Transport::finished_sends),
/// which is collective: every rank calls it once per transfer round and gets
/// the same matrix, where entry `[from][to]` is the number of bytes `from`
/// sent to `to` in that round.
pub trait Transport {
    /// This rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn n_ranks(&self) -> usize;

    /// Queue a buffer for `to`.
    fn send(&mut self, to: usize, data: Vec<u8>) -> Result<(), TransportError>;

    /// Flush queued sends and exchange byte counts with every rank.
    fn finished_sends(&mut self) -> Result<Vec<Vec<usize>>, TransportError>;

    /// Receive the buffer `from` sent this round.
    fn receive(&mut self, from: usize) -> Result<Vec<u8>, TransportError>;
}

/// Transport of a serial run. Only self-sends are possible.
#[derive(Debug, Default)]
pub struct SingleRank {
    pending: Vec<Vec<u8>>,
    delivered: Vec<Vec<u8>>,
}

impl SingleRank {
    /// New serial transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn send(&mut self, to: usize, data: Vec<u8>) -> Result<(), TransportError> {
        if to != 0 {
            return Err(TransportError::BadRank { rank: to, n_ranks: 1 });
        }
        self.pending.push(data);
        Ok(())
    }

    fn finished_sends(&mut self) -> Result<Vec<Vec<usize>>, TransportError> {
        let bytes = self.pending.iter().map(Vec::len).sum();
        self.delivered = std::mem::take(&mut self.pending);
        Ok(vec![vec![bytes]])
    }

    fn receive(&mut self, from: usize) -> Result<Vec<u8>, TransportError> {
        if from != 0 {
            return Err(TransportError::BadRank { rank: from, n_ranks: 1 });
        }
        Ok(self.delivered.drain(..).flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rank_self_send() {
        let mut t = SingleRank::new();
        assert!(t.send(1, vec![1]).is_err());
        t.send(0, vec![1, 2]).unwrap();
        t.send(0, vec![3]).unwrap();
        assert_eq!(t.finished_sends().unwrap(), vec![vec![3]]);
        assert_eq!(t.receive(0).unwrap(), vec![1, 2, 3]);
        assert_eq!(t.finished_sends().unwrap(), vec![vec![0]]);
    }
}
