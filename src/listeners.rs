use alloc::{sync::Arc, vec::Vec};
use core::cell::RefCell;

use critical_section::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u32);

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u32,
    entries: Vec<(SubscriptionId, Callback<T>)>,
}

/// Observer list safe to notify from interrupt or timer context.
///
/// Callbacks run outside the critical section, so they may subscribe or
/// unsubscribe (including themselves) without deadlocking.
pub struct Listeners<T> {
    inner: Mutex<RefCell<Subscribers<T>>>,
}

impl<T: Copy> Listeners<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(T) + Send + Sync + 'static) -> SubscriptionId {
        let listener: Callback<T> = Arc::new(listener);
        critical_section::with(|cs| {
            let mut subs = self.inner.borrow_ref_mut(cs);
            let id = SubscriptionId(subs.next_id);
            subs.next_id = subs.next_id.wrapping_add(1);
            subs.entries.push((id, listener));
            id
        })
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        critical_section::with(|cs| {
            let mut subs = self.inner.borrow_ref_mut(cs);
            let before = subs.entries.len();
            subs.entries.retain(|(entry, _)| *entry != id);
            subs.entries.len() != before
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener subscribed at the time of the call, in
    /// subscription order.
    pub fn emit(&self, value: T) {
        let snapshot: Vec<Callback<T>> = critical_section::with(|cs| {
            self.inner
                .borrow_ref(cs)
                .entries
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect()
        });

        for listener in snapshot {
            listener(value);
        }
    }
}

impl<T: Copy> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}
