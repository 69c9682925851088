use std::sync::Arc;

use dashmap::DashMap;

use super::job::Job;
use crate::request::TaskId;

/// Tasks that have been submitted and have not reached a terminal state.
///
/// Each entry is removed exactly once: by the worker after its terminal
/// callback has been posted, or by `stop` for tasks that never ran.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: DashMap<TaskId, Arc<dyn Job>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: TaskId, job: Arc<dyn Job>) {
        self.entries.insert(id, job);
    }

    pub(crate) fn job(&self, id: TaskId) -> Option<Arc<dyn Job>> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        match self.entries.get(&id) {
            Some(entry) => {
                entry.value().cancel_flag().cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_by_tag(&self, tag: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().tag() == Some(tag))
            .map(|entry| entry.value().cancel_flag().cancel())
            .count()
    }

    pub(crate) fn cancel_all(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.value().cancel_flag().cancel())
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::dispatch::delivery::Delivery;
    use crate::dispatch::job::Services;
    use crate::request::CancelFlag;

    struct Stub {
        tag: Option<&'static str>,
        cancel: CancelFlag,
    }

    #[async_trait]
    impl Job for Stub {
        fn url(&self) -> &str {
            "https://example.com"
        }

        fn cancel_flag(&self) -> &CancelFlag {
            &self.cancel
        }

        fn tag(&self) -> Option<&str> {
            self.tag
        }

        fn post_cancel(&self, _what: TaskId, _delivery: &Delivery) {}

        fn post_failure(&self, _what: TaskId, _delivery: &Delivery) {}

        async fn run(&self, _what: TaskId, _services: &Services, _delivery: &Delivery) {}
    }

    fn stub(tag: Option<&'static str>) -> (Arc<dyn Job>, CancelFlag) {
        let cancel = CancelFlag::new();
        let job: Arc<dyn Job> = Arc::new(Stub {
            tag,
            cancel: cancel.clone(),
        });
        (job, cancel)
    }

    #[test]
    fn test_remove_happens_once() {
        let registry = ListenerRegistry::new();
        let (job, _) = stub(None);
        registry.insert(TaskId::new(1), job);
        assert!(registry.remove(TaskId::new(1)));
        assert!(!registry.remove(TaskId::new(1)));
        assert!(registry.job(TaskId::new(1)).is_none());
    }

    #[test]
    fn test_cancel_by_tag_only_touches_matching() {
        let registry = ListenerRegistry::new();
        let (a, a_flag) = stub(Some("images"));
        let (b, b_flag) = stub(Some("docs"));
        let (c, c_flag) = stub(None);
        registry.insert(TaskId::new(1), a);
        registry.insert(TaskId::new(2), b);
        registry.insert(TaskId::new(3), c);

        assert_eq!(registry.cancel_by_tag("images"), 1);
        assert!(a_flag.is_cancelled());
        assert!(!b_flag.is_cancelled());
        assert!(!c_flag.is_cancelled());

        assert_eq!(registry.cancel_all(), 3);
        assert!(c_flag.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_id() {
        let registry = ListenerRegistry::new();
        assert!(!registry.cancel(TaskId::new(42)));
    }
}
