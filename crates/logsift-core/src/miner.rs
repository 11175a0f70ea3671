//! Online template miner: the parse tree behind a lock, coupled to the
//! template catalog.
//!
//! [`TemplateMiner::insert`] holds the tree's write lock only for the
//! in-memory insert, releases it, awaits the catalog, then briefly
//! re-takes the lock to bind the catalog id onto the leaf group. No
//! guard is ever held across an `.await`.
//!
//! If the catalog call fails the tree keeps the new or updated group,
//! unbound. The next insert that lands on it retries the catalog.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::TemplateCatalog;
use crate::error::{SiftError, SiftResult};
use crate::models::{EntryId, TemplateId};
use crate::tree::{DrainTree, TreeConfig, TreeStats};

pub struct TemplateMiner {
    tree: RwLock<DrainTree>,
    catalog: Arc<TemplateCatalog>,
}

impl TemplateMiner {
    pub fn new(config: TreeConfig, catalog: Arc<TemplateCatalog>) -> Self {
        Self {
            tree: RwLock::new(DrainTree::new(config)),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    /// Assign `tokens` to a template and return its catalog id.
    ///
    /// `example` is the raw line, kept as the example of a new template.
    pub async fn insert(
        &self,
        entry_id: EntryId,
        tokens: &[String],
        example: &str,
    ) -> SiftResult<TemplateId> {
        let (inserted, pattern, bound) = {
            let mut tree = self.write();
            let inserted = tree.insert(tokens, example);
            let group = tree
                .group(inserted.group)
                .ok_or_else(|| SiftError::IndexInconsistency {
                    entry_id,
                    template_id: None,
                    detail: format!("group {} missing after insert", inserted.group),
                })?;
            (inserted, group.pattern_string.clone(), group.template_id)
        };

        if inserted.created {
            tracing::debug!(entry_id, pattern = %pattern, "new template group");
        }

        match self.catalog.get_or_create(&pattern, example).await {
            Ok(id) => {
                if bound != Some(id) {
                    self.write().bind_template(inserted.group, id);
                }
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(
                    entry_id,
                    group = inserted.group,
                    error = %e,
                    "template group left unbound"
                );
                Err(e)
            }
        }
    }

    /// Read-only best match. `None` when nothing clears the threshold or
    /// the matching group has not been cataloged yet.
    pub fn lookup(&self, tokens: &[String]) -> Option<TemplateId> {
        let tree = self.read();
        let group = tree.lookup(tokens)?;
        tree.group(group)?.template_id
    }

    /// Pattern string of the best match, bound or not.
    pub fn lookup_pattern(&self, tokens: &[String]) -> Option<String> {
        let tree = self.read();
        let group = tree.lookup(tokens)?;
        tree.group(group).map(|g| g.pattern_string.clone())
    }

    pub fn tree_stats(&self) -> TreeStats {
        self.read().stats()
    }

    /// Text rendering of the parse tree, see [`DrainTree::dump`].
    pub fn dump_tree(&self) -> String {
        self.read().dump()
    }

    /// Number of leaf groups that have no catalog id.
    pub fn unbound_groups(&self) -> usize {
        self.read().groups().filter(|g| g.template_id.is_none()).count()
    }

    fn read(&self) -> RwLockReadGuard<'_, DrainTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DrainTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}
