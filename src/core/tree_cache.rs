//! Index trie storing jobs by their index array.
//!
//! Each level of the tree branches on one index component, so exact lookups
//! cost O(depth) and every job sharing a prefix lives in a single subtree.

use std::collections::BTreeMap;

use tokenweave_types::IndexArray;

use crate::core::events::Job;

#[derive(Debug, Default)]
struct TreeNode {
    job: Option<Job>,
    children: BTreeMap<usize, TreeNode>,
}

impl TreeNode {
    fn is_vacant(&self) -> bool {
        self.job.is_none() && self.children.is_empty()
    }

    fn find(&self, path: &[usize]) -> Option<&TreeNode> {
        let mut node = self;
        for component in path {
            node = node.children.get(component)?;
        }
        Some(node)
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Job>) {
        if let Some(job) = &self.job {
            out.push(job);
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }

    fn cut(&mut self, path: &[usize]) -> Option<Job> {
        match path.split_first() {
            None => self.job.take(),
            Some((head, rest)) => {
                let child = self.children.get_mut(head)?;
                let job = child.cut(rest);
                if child.is_vacant() {
                    self.children.remove(head);
                }
                job
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeCache {
    root: TreeNode,
    index_length: usize,
    len: usize,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `job` at its index. A job already stored there is replaced.
    pub fn insert(&mut self, job: Job) {
        if self.len == 0 {
            self.index_length = job.index.len();
        } else if job.index.len() != self.index_length {
            tracing::warn!(
                index = %job.index,
                expected = self.index_length,
                "tree cache insert with unexpected index length"
            );
        }
        let mut node = &mut self.root;
        for component in job.index.iter() {
            node = node.children.entry(*component).or_default();
        }
        if node.job.replace(job).is_none() {
            self.len += 1;
        }
    }

    pub fn get(&self, index: &IndexArray) -> Option<&Job> {
        self.root.find(index.as_slice())?.job.as_ref()
    }

    pub fn contains(&self, index: &IndexArray) -> bool {
        self.get(index).is_some()
    }

    /// Removes and returns the job stored exactly at `index`.
    pub fn cut(&mut self, index: &IndexArray) -> Option<Job> {
        let job = self.root.cut(index.as_slice());
        if job.is_some() {
            self.len -= 1;
        }
        job
    }

    /// Every stored job whose index starts with `prefix`, in index order.
    pub fn jobs_with_prefix(&self, prefix: &IndexArray) -> Vec<&Job> {
        let mut out = Vec::new();
        if let Some(node) = self.root.find(prefix.as_slice()) {
            node.collect(&mut out);
        }
        out
    }

    /// Common index length of the stored jobs, 0 when empty.
    pub fn index_length(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.index_length
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = TreeNode::default();
        self.len = 0;
    }
}
