use crate::content;
use crate::node::{DirNode, FileKind, Leaf};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;
use treediff_common::{ErrorPolicy, Result, TreeDiffError};

/// Options controlling one comparison run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareOptions {
    /// Match entry names case-insensitively
    pub ignore_case: bool,
    /// Allow the line-normalized text comparison method
    pub text_compare: bool,
}

/// Dual-sided result for a leaf pair. An empty name means the entry is
/// absent on that side; `are_same` is meaningful only when both are present.
#[derive(Debug, Clone, Serialize)]
pub struct LeafComparisonResult {
    pub name1: String,
    pub name2: String,
    pub missing1: bool,
    pub missing2: bool,
    pub are_same: bool,
}

impl LeafComparisonResult {
    pub fn present_on_both(&self) -> bool {
        !self.missing1 && !self.missing2
    }
}

/// Dual-sided result for a directory pair, mirroring `DirNode`'s shape.
/// A directory is same iff both sides are present and every child
/// comparison is itself same.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonDirNode {
    pub name1: String,
    pub name2: String,
    pub missing1: bool,
    pub missing2: bool,
    pub are_same: bool,
    pub dirs: Vec<ComparisonDirNode>,
    pub files: Vec<LeafComparisonResult>,
}

impl ComparisonDirNode {
    pub fn present_on_both(&self) -> bool {
        !self.missing1 && !self.missing2
    }
}

/// Merges two directory trees into a comparison tree.
pub struct TreeComparator<'a> {
    options: CompareOptions,
    policy: &'a dyn ErrorPolicy,
}

impl<'a> TreeComparator<'a> {
    pub fn new(options: CompareOptions, policy: &'a dyn ErrorPolicy) -> Self {
        Self { options, policy }
    }

    /// Compare two trees, either of which may be absent. An absent side
    /// yields a fully missing-on-that-side subtree.
    pub fn compare(
        &self,
        a: Option<&DirNode>,
        b: Option<&DirNode>,
    ) -> Result<ComparisonDirNode> {
        match (a, b) {
            (Some(a), Some(b)) => self.compare_dirs(a, b),
            (Some(a), None) => self.one_sided(a, true),
            (None, Some(b)) => self.one_sided(b, false),
            (None, None) => Ok(ComparisonDirNode {
                name1: String::new(),
                name2: String::new(),
                missing1: true,
                missing2: true,
                are_same: false,
                dirs: Vec::new(),
                files: Vec::new(),
            }),
        }
    }

    fn compare_dirs(&self, a: &DirNode, b: &DirNode) -> Result<ComparisonDirNode> {
        self.check_duplicates(a)?;
        self.check_duplicates(b)?;

        let dirs = self.merge_dirs(a, b)?;
        let files = self.merge_files(a, b)?;

        let are_same =
            dirs.iter().all(|d| d.are_same) && files.iter().all(|f| f.are_same);

        debug!(
            "compared {:?} vs {:?}: {} subdirs, {} files, same={}",
            a.name,
            b.name,
            dirs.len(),
            files.len(),
            are_same
        );

        Ok(ComparisonDirNode {
            name1: a.name.clone(),
            name2: b.name.clone(),
            missing1: false,
            missing2: false,
            are_same,
            dirs,
            files,
        })
    }

    /// Greedy two-cursor merge over name-sorted subdirectory lists.
    fn merge_dirs(&self, a: &DirNode, b: &DirNode) -> Result<Vec<ComparisonDirNode>> {
        let sorted_a = self.sorted_refs(&a.dirs, |d| d.name.as_str());
        let sorted_b = self.sorted_refs(&b.dirs, |d| d.name.as_str());

        let mut results = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < sorted_a.len() || j < sorted_b.len() {
            match (sorted_a.get(i), sorted_b.get(j)) {
                (Some(&x), Some(&y)) => {
                    if self.names_match(&x.name, &y.name) {
                        results.push(self.compare_dirs(x, y)?);
                        i += 1;
                        j += 1;
                    } else if self.name_order(&x.name, &y.name) == Ordering::Less {
                        results.push(self.one_sided(x, true)?);
                        i += 1;
                    } else {
                        results.push(self.one_sided(y, false)?);
                        j += 1;
                    }
                }
                (Some(&x), None) => {
                    results.push(self.one_sided(x, true)?);
                    i += 1;
                }
                (None, Some(&y)) => {
                    results.push(self.one_sided(y, false)?);
                    j += 1;
                }
                (None, None) => break,
            }
        }
        Ok(results)
    }

    fn merge_files(&self, a: &DirNode, b: &DirNode) -> Result<Vec<LeafComparisonResult>> {
        let sorted_a = self.sorted_refs(&a.files, |f| f.name.as_str());
        let sorted_b = self.sorted_refs(&b.files, |f| f.name.as_str());

        let mut results = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < sorted_a.len() || j < sorted_b.len() {
            match (sorted_a.get(i), sorted_b.get(j)) {
                (Some(&x), Some(&y)) => {
                    if self.names_match(&x.name, &y.name) {
                        results.push(self.compare_leaves(x, y)?);
                        i += 1;
                        j += 1;
                    } else if self.name_order(&x.name, &y.name) == Ordering::Less {
                        results.push(Self::one_sided_leaf(x, true));
                        i += 1;
                    } else {
                        results.push(Self::one_sided_leaf(y, false));
                        j += 1;
                    }
                }
                (Some(&x), None) => {
                    results.push(Self::one_sided_leaf(x, true));
                    i += 1;
                }
                (None, Some(&y)) => {
                    results.push(Self::one_sided_leaf(y, false));
                    j += 1;
                }
                (None, None) => break,
            }
        }
        Ok(results)
    }

    fn compare_leaves(&self, a: &Leaf, b: &Leaf) -> Result<LeafComparisonResult> {
        let are_same = if a.kind != b.kind {
            false
        } else if a.kind == FileKind::Special {
            // Specials have no readable content; size is all there is
            a.size == b.size
        } else {
            match content::compare_content(a, b, self.options.text_compare) {
                Ok(same) => same,
                Err(
                    error @ (TreeDiffError::Io(_) | TreeDiffError::NoComparableMethod { .. }),
                ) => {
                    if self.policy.handle_error(&error) {
                        false
                    } else {
                        return Err(error);
                    }
                }
                Err(error) => return Err(error),
            }
        };

        Ok(LeafComparisonResult {
            name1: a.name.clone(),
            name2: b.name.clone(),
            missing1: false,
            missing2: false,
            are_same,
        })
    }

    /// Expand a subtree present on only one side. `on_first` says whether
    /// the present side is the first argument.
    fn one_sided(&self, dir: &DirNode, on_first: bool) -> Result<ComparisonDirNode> {
        self.check_duplicates(dir)?;

        let dirs = dir
            .dirs
            .iter()
            .map(|d| self.one_sided(d, on_first))
            .collect::<Result<Vec<_>>>()?;
        let files = dir
            .files
            .iter()
            .map(|f| Self::one_sided_leaf(f, on_first))
            .collect();

        let (name1, name2) = if on_first {
            (dir.name.clone(), String::new())
        } else {
            (String::new(), dir.name.clone())
        };

        Ok(ComparisonDirNode {
            name1,
            name2,
            missing1: !on_first,
            missing2: on_first,
            are_same: false,
            dirs,
            files,
        })
    }

    fn one_sided_leaf(leaf: &Leaf, on_first: bool) -> LeafComparisonResult {
        let (name1, name2) = if on_first {
            (leaf.name.clone(), String::new())
        } else {
            (String::new(), leaf.name.clone())
        };
        LeafComparisonResult {
            name1,
            name2,
            missing1: !on_first,
            missing2: on_first,
            are_same: false,
        }
    }

    fn check_duplicates(&self, dir: &DirNode) -> Result<()> {
        dir.check_unique_child_names()
    }

    fn names_match(&self, a: &str, b: &str) -> bool {
        if self.options.ignore_case {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }

    /// Active name ordering: exact byte order, or case-folded with folded
    /// ties broken in reverse byte order so lowercase variants sort first.
    /// The greedy merge resolves case-insensitive collisions through this
    /// order alone; no alternate pairing is attempted.
    fn name_order(&self, a: &str, b: &str) -> Ordering {
        if self.options.ignore_case {
            match a.to_lowercase().cmp(&b.to_lowercase()) {
                Ordering::Equal => b.cmp(a),
                other => other,
            }
        } else {
            a.cmp(b)
        }
    }

    fn sorted_refs<'t, T>(&self, items: &'t [T], name: impl Fn(&T) -> &str) -> Vec<&'t T> {
        let mut refs: Vec<&T> = items.iter().collect();
        refs.sort_by(|x, y| self.name_order(name(x), name(y)));
        refs
    }
}
