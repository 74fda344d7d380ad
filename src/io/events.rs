use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc;

/// Notifications for presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// A local mutation, e.g. a direct user action or any database change
    TasksChanged,
    /// Reconciliation changed tasks because a document changed
    TasksChangedExternally,
    /// Hint for a UI to show the task list
    ViewRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(TaskEvent)>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback)>,
    emitting: bool,
    removed_while_emitting: Vec<SubscriptionId>,
    torn_down: bool,
}

/// Process-wide notification channel, constructed by the owner of the
/// engine and handed to whoever needs to publish or listen.
///
/// Cloning yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<Subscribers>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl FnMut(TaskEvent) + 'static) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        inner.torn_down = false;
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.entries.push((id, Box::new(callback)));
        id
    }

    /// Subscribe with a channel instead of a callback
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event);
        });
        (id, rx)
    }

    /// Returns false if the subscription was not found
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|(sid, _)| *sid != id);
        if inner.entries.len() != before {
            return true;
        }
        if inner.emitting {
            inner.removed_while_emitting.push(id);
            return true;
        }
        false
    }

    pub fn emit(&self, event: TaskEvent) {
        tracing::debug!(?event, "emit");
        let mut entries = {
            let mut inner = self.inner.borrow_mut();
            inner.emitting = true;
            std::mem::take(&mut inner.entries)
        };

        // Callbacks may subscribe, unsubscribe or emit while we hold the list
        for (_, callback) in entries.iter_mut() {
            callback(event);
        }

        let mut inner = self.inner.borrow_mut();
        inner.emitting = false;
        let removed = std::mem::take(&mut inner.removed_while_emitting);
        if inner.torn_down {
            return;
        }
        entries.retain(|(id, _)| !removed.contains(id));
        entries.append(&mut inner.entries);
        inner.entries = entries;
    }

    /// Drop every subscriber
    pub fn teardown(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.entries.clear();
        inner.removed_while_emitting.clear();
        inner.torn_down = true;
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }
}
