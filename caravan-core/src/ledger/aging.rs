// Perishable stock tracked as age cohorts

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{Millis, Quantity};

/// A cohort of stock that was created at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub age: Millis,
    pub amount: Quantity,
}

/// Batches ordered by age, youngest at the front.
///
/// New stock enters at the front with age 0; draws always come off the back,
/// so the oldest stock leaves first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgingQueue {
    batches: VecDeque<Batch>,
}

impl AgingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Quantity {
        self.batches.iter().map(|b| b.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }

    /// Add a fresh batch at age 0, folding into the front batch if it is also fresh.
    pub fn create(&mut self, amount: Quantity) {
        if amount <= 0.0 {
            return;
        }
        match self.batches.front_mut() {
            Some(front) if front.age == 0 => front.amount += amount,
            _ => self.batches.push_front(Batch { age: 0, amount }),
        }
    }

    /// Remove up to `amount` from the oldest batches, returning what was removed.
    pub fn drain_oldest(&mut self, amount: Quantity) -> Quantity {
        self.split_oldest(amount).total()
    }

    /// Detach up to `amount` from the oldest batches, keeping their ages.
    pub fn split_oldest(&mut self, mut amount: Quantity) -> AgingQueue {
        let mut moved = AgingQueue::new();
        while amount > 0.0 {
            let Some(mut oldest) = self.batches.pop_back() else {
                break;
            };
            if oldest.amount > amount {
                oldest.amount -= amount;
                self.batches.push_back(oldest);
                moved.batches.push_front(Batch {
                    age: oldest.age,
                    amount,
                });
                amount = 0.0;
            } else {
                amount -= oldest.amount;
                moved.batches.push_front(oldest);
            }
        }
        moved
    }

    /// Merge another queue in, keeping age order.
    pub fn merge(&mut self, other: AgingQueue) {
        if other.is_empty() {
            return;
        }
        let mut merged = VecDeque::with_capacity(self.batches.len() + other.batches.len());
        let mut left = std::mem::take(&mut self.batches).into_iter().peekable();
        let mut right = other.batches.into_iter().peekable();
        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.age <= r.age,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            if let Some(batch) = next {
                merged.push_back(batch);
            }
        }
        self.batches = merged;
    }

    /// Advance every batch by `elapsed`.
    ///
    /// Batches whose age would pass `shelf_life` are removed and their total
    /// returned; `None` means the stock never expires.
    pub fn expire(&mut self, elapsed: Millis, shelf_life: Option<Millis>) -> Quantity {
        let mut expired = 0.0;
        if let Some(window) = shelf_life {
            while let Some(oldest) = self.batches.back() {
                if oldest.age + elapsed <= window {
                    break;
                }
                expired += oldest.amount;
                self.batches.pop_back();
            }
        }
        for batch in &mut self.batches {
            batch.age += elapsed;
        }
        expired
    }

    /// Scale every batch so the queue sums to `target`.
    pub fn rescale(&mut self, target: Quantity) {
        let total = self.total();
        if total <= 0.0 {
            self.batches.clear();
            self.create(target);
            return;
        }
        let ratio = target / total;
        for batch in &mut self.batches {
            batch.amount *= ratio;
        }
        self.batches.retain(|b| b.amount > 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_takes_oldest_first() {
        let mut queue = AgingQueue::new();
        queue.create(4.0);
        queue.expire(10, None);
        queue.create(6.0);

        let drained = queue.drain_oldest(5.0);
        assert_eq!(drained, 5.0);
        // The aged batch of 4 is gone, 1 came off the fresh batch.
        let batches: Vec<_> = queue.iter().copied().collect();
        assert_eq!(batches, vec![Batch { age: 0, amount: 5.0 }]);
    }

    #[test]
    fn test_split_keeps_ages() {
        let mut queue = AgingQueue::new();
        queue.create(2.0);
        queue.expire(7, None);
        queue.create(3.0);

        let moved = queue.split_oldest(3.0);
        let moved: Vec<_> = moved.iter().copied().collect();
        assert_eq!(
            moved,
            vec![Batch { age: 0, amount: 1.0 }, Batch { age: 7, amount: 2.0 }]
        );
        assert_eq!(queue.total(), 2.0);
    }

    #[test]
    fn test_merge_is_ordered() {
        let mut a = AgingQueue::new();
        a.create(1.0);
        a.expire(5, None);
        let mut b = AgingQueue::new();
        b.create(2.0);
        b.expire(3, None);
        b.create(1.0);

        a.merge(b);
        let ages: Vec<_> = a.iter().map(|b| b.age).collect();
        assert_eq!(ages, vec![0, 3, 5]);
        assert_eq!(a.total(), 4.0);
    }

    #[test]
    fn test_expire_boundary() {
        let mut queue = AgingQueue::new();
        queue.create(5.0);
        // Age would be exactly the shelf life: survives.
        assert_eq!(queue.expire(10, Some(10)), 0.0);
        // Any further time pushes it past.
        assert_eq!(queue.expire(1, Some(10)), 5.0);
        assert!(queue.is_empty());
    }
}
