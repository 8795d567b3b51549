use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::address::CanonicalAddress;

pub const DEFAULT_UNDO_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pickup,
    Delivery,
    Both,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Pickup => "pickup",
            Side::Delivery => "delivery",
            Side::Both => "both",
        }
    }
}

/// Immutable value pair held by the history. Cloning never shares state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub pickup: CanonicalAddress,
    pub delivery: CanonicalAddress,
}

impl Snapshot {
    pub fn new(pickup: CanonicalAddress, delivery: CanonicalAddress) -> Self {
        Self { pickup, delivery }
    }

    /// `Both` reads as the pickup side.
    pub fn get(&self, side: Side) -> &CanonicalAddress {
        match side {
            Side::Pickup | Side::Both => &self.pickup,
            Side::Delivery => &self.delivery,
        }
    }

    pub fn with_side(&self, side: Side, address: CanonicalAddress) -> Self {
        match side {
            Side::Pickup => Self {
                pickup: address,
                delivery: self.delivery.clone(),
            },
            Side::Delivery => Self {
                pickup: self.pickup.clone(),
                delivery: address,
            },
            Side::Both => Self {
                pickup: address.clone(),
                delivery: address,
            },
        }
    }
}

/// Bounded undo/redo history around a current value.
#[derive(Debug, Clone)]
pub struct UndoStack<T> {
    past: VecDeque<T>,
    future: Vec<T>,
    current: T,
    capacity: usize,
}

impl<T: Clone> UndoStack<T> {
    pub fn new(initial: T, capacity: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            current: initial,
            capacity: capacity.max(1),
        }
    }

    /// Replaces the current value and forgets all history.
    pub fn init(&mut self, snapshot: T) {
        self.past.clear();
        self.future.clear();
        self.current = snapshot;
    }

    pub fn push(&mut self, snapshot: T) {
        let previous = std::mem::replace(&mut self.current, snapshot);
        self.past.push_back(previous);
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        self.future.clear();
    }

    pub fn undo(&mut self) -> &T {
        if let Some(previous) = self.past.pop_back() {
            let current = std::mem::replace(&mut self.current, previous);
            self.future.push(current);
            if self.future.len() > self.capacity {
                self.future.remove(0);
            }
        }
        &self.current
    }

    pub fn redo(&mut self) -> &T {
        if let Some(next) = self.future.pop() {
            let current = std::mem::replace(&mut self.current, next);
            self.past.push_back(current);
            if self.past.len() > self.capacity {
                self.past.pop_front();
            }
        }
        &self.current
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> (usize, usize) {
        (self.past.len(), self.future.len())
    }
}
