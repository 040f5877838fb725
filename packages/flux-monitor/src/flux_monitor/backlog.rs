use std::collections::VecDeque;

use flux_types::{FluxLog, LogBroadcast};

/// Per priority class capacity, indexed by `FluxLog::priority`
const CAPACITIES: [usize; 3] = [
    2, // flag raised / lowered
    2, // new round
    1, // answer updated
];

/// Bounded priority queue of pending logs.
///
/// A full class drops its oldest entry. Dropped logs are not consumed, so the
/// log source delivers them again later.
#[derive(Debug, Default)]
pub struct LogBacklog {
    queues: [VecDeque<LogBroadcast>; 3],
}

impl LogBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry pushed out to make room, if any
    pub fn push(&mut self, broadcast: LogBroadcast) -> Option<LogBroadcast> {
        let class = class_of(&broadcast.log);
        let queue = &mut self.queues[class];

        let dropped = if queue.len() >= CAPACITIES[class] {
            queue.pop_front()
        } else {
            None
        };

        queue.push_back(broadcast);
        dropped
    }

    /// Highest priority first, oldest first within a class
    pub fn pop(&mut self) -> Option<LogBroadcast> {
        self.queues.iter_mut().find_map(|queue| queue.pop_front())
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}

fn class_of(log: &FluxLog) -> usize {
    usize::from(log.priority()).min(CAPACITIES.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        mock_answer_updated_log, mock_flag_lowered_log, mock_flag_raised_log, mock_new_round_log,
    };
    use alloy_primitives::Address;

    fn agg() -> Address {
        Address::repeat_byte(1)
    }

    #[test]
    fn pops_in_priority_order() {
        let mut backlog = LogBacklog::new();
        let answer = mock_answer_updated_log(agg(), 1, 10);
        let round = mock_new_round_log(agg(), 2, Address::ZERO, 0);
        let flag = mock_flag_lowered_log(Address::repeat_byte(2), Address::ZERO, 3);

        backlog.push(answer.clone());
        backlog.push(round.clone());
        backlog.push(flag.clone());
        assert_eq!(backlog.len(), 3);

        assert_eq!(backlog.pop(), Some(flag));
        assert_eq!(backlog.pop(), Some(round));
        assert_eq!(backlog.pop(), Some(answer));
        assert_eq!(backlog.pop(), None);
        assert!(backlog.is_empty());
    }

    #[test]
    fn full_class_drops_oldest() {
        let mut backlog = LogBacklog::new();

        let rounds: Vec<_> = (1..=3)
            .map(|round| mock_new_round_log(agg(), round, Address::ZERO, 0))
            .collect();
        assert_eq!(backlog.push(rounds[0].clone()), None);
        assert_eq!(backlog.push(rounds[1].clone()), None);
        assert_eq!(backlog.push(rounds[2].clone()), Some(rounds[0].clone()));

        let first = mock_answer_updated_log(agg(), 1, 10);
        let second = mock_answer_updated_log(agg(), 2, 20);
        assert_eq!(backlog.push(first.clone()), None);
        assert_eq!(backlog.push(second.clone()), Some(first));

        let flags = Address::repeat_byte(2);
        backlog.push(mock_flag_raised_log(flags, Address::ZERO, 1));
        backlog.push(mock_flag_lowered_log(flags, Address::ZERO, 2));
        assert_eq!(backlog.len(), 5);

        assert!(matches!(backlog.pop().unwrap().log, FluxLog::FlagRaised(_)));
        assert!(matches!(backlog.pop().unwrap().log, FluxLog::FlagLowered(_)));
        assert_eq!(backlog.pop(), Some(rounds[1].clone()));
        assert_eq!(backlog.pop(), Some(rounds[2].clone()));
        assert_eq!(backlog.pop(), Some(second));
    }
}
