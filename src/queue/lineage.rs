use crate::queue::task::{CrawlTask, TaskId};
use dashmap::DashMap;
use url::Url;

#[derive(Debug, Clone)]
struct LineageEntry {
    locator: Url,
    parent: Option<TaskId>,
}

/// Index of which task discovered which, keyed by task id
///
/// Tasks only hold their parent's id; walking the chain goes through here.
#[derive(Debug, Default)]
pub struct Lineage {
    entries: DashMap<TaskId, LineageEntry>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task: &CrawlTask) {
        self.entries.insert(
            task.id,
            LineageEntry {
                locator: task.locator.clone(),
                parent: task.parent,
            },
        );
    }

    /// Drops the entry for a task that never made it into the queue
    pub fn forget(&self, id: TaskId) {
        self.entries.remove(&id);
    }

    pub fn locator(&self, id: TaskId) -> Option<Url> {
        self.entries.get(&id).map(|entry| entry.locator.clone())
    }

    /// Locator of the page that linked to `task`
    pub fn parent_locator(&self, task: &CrawlTask) -> Option<Url> {
        task.parent.and_then(|parent| self.locator(parent))
    }

    /// Locators from `id` back to its seed, nearest first
    pub fn chain(&self, id: TaskId) -> Vec<Url> {
        let limit = self.entries.len();
        let mut chain = Vec::new();
        let mut current = Some(id);

        while let Some(id) = current {
            let Some(entry) = self.entries.get(&id) else {
                break;
            };
            chain.push(entry.locator.clone());
            current = entry.parent;
            if chain.len() > limit {
                break;
            }
        }

        chain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
