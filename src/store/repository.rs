use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// A handle on one bare repository.
///
/// The handle carries an ephemeral staging overlay in place of a worktree:
/// reads consult the overlay first and fall back to the tree of the pinned
/// commit (or `HEAD`), and [`Repository::commit`] turns the overlay into a
/// real commit. Bare repos never get an on-disk worktree.
pub struct Repository {
    inner: git2::Repository,
    pinned: Option<git2::Oid>,
    staged: BTreeMap<String, Vec<u8>>,
}

impl Repository {
    pub(super) fn new(inner: git2::Repository) -> Self {
        Self {
            inner,
            pinned: None,
            staged: BTreeMap::new(),
        }
    }

    /// Pin reads to a specific commit, or back to `HEAD` when `rev` is
    /// `None`. A repo without any commits is a valid (empty) state, not an
    /// error; pinning to a hash that does not exist is.
    pub fn checkout(&mut self, rev: Option<&str>) -> Result<()> {
        match rev {
            Some(hash) if !hash.is_empty() => {
                let oid = git2::Oid::from_str(hash)?;
                self.inner.find_commit(oid)?;
                self.pinned = Some(oid);
            }
            _ => self.pinned = None,
        }

        self.staged.clear();

        Ok(())
    }

    /// The commit reads currently resolve against, if there is one.
    fn current_commit(&self) -> Result<Option<git2::Commit<'_>>> {
        if let Some(oid) = self.pinned {
            return Ok(Some(self.inner.find_commit(oid)?));
        }

        match self.inner.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn committed_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(commit) = self.current_commit()? else {
            return Ok(None);
        };

        let tree = commit.tree()?;

        let Ok(entry) = tree.get_path(Path::new(path)) else {
            return Ok(None);
        };

        match self.inner.find_blob(entry.id()) {
            Ok(blob) => Ok(Some(blob.content().to_vec())),
            Err(_) => Ok(None),
        }
    }

    /// Read a file, staged overlay first, then the pinned commit's tree.
    pub fn file(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(data) = self.staged.get(path) {
            return Ok(data.clone());
        }

        self.committed_file(path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.file(path).is_ok()
    }

    /// Stage a file for the next commit.
    pub fn stage(&mut self, path: &str, data: Vec<u8>) {
        self.staged.insert(path.to_string(), data);
    }

    /// Whether any staged file differs from what is already committed.
    pub fn is_dirty(&self) -> bool {
        self.staged.iter().any(|(path, data)| {
            !matches!(self.committed_file(path), Ok(Some(existing)) if existing == *data)
        })
    }

    /// Commit the staging overlay on top of `HEAD`.
    pub fn commit(&mut self, message: &str) -> Result<git2::Oid> {
        if !self.is_dirty() {
            return Err(Error::NothingToCommit);
        }

        let signature = git2::Signature::now("root", "root@localhost")?;

        let parent = match self.inner.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                None
            }
            Err(e) => return Err(e.into()),
        };

        let base_tree = match &parent {
            Some(commit) => Some(commit.tree()?),
            None => None,
        };

        let tree_oid = self.build_tree(base_tree.as_ref(), &self.staged)?;
        let tree = self.inner.find_tree(tree_oid)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self.inner.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;

        self.staged.clear();

        Ok(oid)
    }

    /// Build a tree from `base` plus the given files, creating nested trees
    /// for path components as needed.
    fn build_tree(
        &self,
        base: Option<&git2::Tree<'_>>,
        entries: &BTreeMap<String, Vec<u8>>,
    ) -> Result<git2::Oid> {
        let mut files: Vec<(&str, &[u8])> = Vec::new();
        let mut dirs: BTreeMap<&str, BTreeMap<String, Vec<u8>>> = BTreeMap::new();

        for (path, data) in entries {
            match path.split_once('/') {
                Some((dir, rest)) => {
                    dirs.entry(dir)
                        .or_default()
                        .insert(rest.to_string(), data.clone());
                }
                None => files.push((path, data)),
            }
        }

        let mut builder = self.inner.treebuilder(base)?;

        for (name, data) in files {
            let oid = self.inner.blob(data)?;
            builder.insert(name, oid, 0o100644)?;
        }

        for (dir, sub_entries) in dirs {
            let sub_base = base
                .and_then(|tree| tree.get_name(dir))
                .and_then(|entry| entry.to_object(&self.inner).ok())
                .and_then(|object| object.into_tree().ok());

            let sub_oid = self.build_tree(sub_base.as_ref(), &sub_entries)?;
            builder.insert(dir, sub_oid, 0o040000)?;
        }

        Ok(builder.write()?)
    }
}
