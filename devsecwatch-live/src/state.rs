//! Shared mutable state. Guards are short-lived and never held across `.await`.

use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Runs `f` under the lock; the guard cannot escape the closure.
pub fn with_state<T, R>(state: &Shared<T>, f: impl FnOnce(&mut T) -> R) -> R {
    f(&mut state.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_state_mutates_and_returns() {
        let state = new_state(vec![1, 2]);
        let len = with_state(&state, |v| {
            v.push(3);
            v.len()
        });
        assert_eq!(len, 3);
        assert_eq!(*state.lock(), vec![1, 2, 3]);
    }
}
