use crate::node::DirNode;
use std::collections::BTreeMap;
use tracing::debug;

/// Reusable integer frequency counter keyed by a signed bin.
#[derive(Debug, Clone, Default)]
pub struct FrequencyCounter {
    counts: BTreeMap<i64, u64>,
}

impl FrequencyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bin: i64) {
        *self.counts.entry(bin).or_insert(0) += 1;
    }

    pub fn count(&self, bin: i64) -> u64 {
        self.counts.get(&bin).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Bin with the highest count; ties prefer the smaller absolute bin,
    /// then the smaller bin.
    pub fn best_bin(&self) -> Option<i64> {
        self.counts
            .iter()
            .max_by(|(bin_a, count_a), (bin_b, count_b)| {
                count_a
                    .cmp(count_b)
                    .then(bin_b.abs().cmp(&bin_a.abs()))
                    .then(bin_b.cmp(bin_a))
            })
            .map(|(bin, _)| *bin)
    }
}

/// Searches for the descendant subtree that best corresponds to another
/// tree's root, scoring candidates by descendant name overlap.
pub struct AlignmentAnalyser {
    ignore_case: bool,
}

impl AlignmentAnalyser {
    pub fn new(ignore_case: bool) -> Self {
        Self { ignore_case }
    }

    /// Name-overlap score in [0, 1] over the full descendant name multisets
    /// of both trees: 0 for disjoint names, approaching 1 as the multisets
    /// converge.
    pub fn match_factor(&self, a: &DirNode, b: &DirNode) -> f64 {
        let mut names_a = BTreeMap::new();
        self.collect_names(a, &mut names_a);
        let mut names_b = BTreeMap::new();
        self.collect_names(b, &mut names_b);

        let total_a: u64 = names_a.values().sum();
        let total_b: u64 = names_b.values().sum();
        if total_a + total_b == 0 {
            return 0.0;
        }

        let shared: u64 = names_a
            .iter()
            .map(|(name, count)| (*count).min(names_b.get(name).copied().unwrap_or(0)))
            .sum();

        2.0 * shared as f64 / (total_a + total_b) as f64
    }

    /// Bounded greedy descent from `a` towards the subtree scoring highest
    /// against `b`'s root. Descends only while a child strictly improves on
    /// the current node's score; on ties it stops rather than re-rooting
    /// deeper. Returns the path of nodes walked, starting at `a`.
    pub fn best_sub_tree<'a>(
        &self,
        max_depth: usize,
        a: &'a DirNode,
        b: &DirNode,
    ) -> Vec<&'a DirNode> {
        let mut path = vec![a];
        let mut current = a;
        let mut current_score = self.match_factor(current, b);

        for _ in 0..max_depth {
            let mut best: Option<(&DirNode, f64)> = None;
            for child in &current.dirs {
                let score = self.match_factor(child, b);
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((child, score));
                }
            }
            match best {
                Some((child, score)) if score > current_score => {
                    debug!(
                        "descending into {:?}: score {:.3} > {:.3}",
                        child.name, score, current_score
                    );
                    path.push(child);
                    current = child;
                    current_score = score;
                }
                _ => break,
            }
        }
        path
    }

    /// Depth-shift estimate between the trees: the most frequent difference
    /// in depth between same-named entries, positive when names sit deeper
    /// in `b` than in `a`. A secondary heuristic for seeding or bounding the
    /// subtree search.
    pub fn find_best_depth_alignment(&self, a: &DirNode, b: &DirNode) -> i64 {
        let mut depths_a = BTreeMap::new();
        self.collect_depths(a, 0, &mut depths_a);
        let mut depths_b = BTreeMap::new();
        self.collect_depths(b, 0, &mut depths_b);

        let mut counter = FrequencyCounter::new();
        for (name, at_a) in &depths_a {
            if let Some(at_b) = depths_b.get(name) {
                for depth_a in at_a {
                    for depth_b in at_b {
                        counter.add(*depth_b as i64 - *depth_a as i64);
                    }
                }
            }
        }
        counter.best_bin().unwrap_or(0)
    }

    fn fold(&self, name: &str) -> String {
        if self.ignore_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn collect_names(&self, dir: &DirNode, out: &mut BTreeMap<String, u64>) {
        for sub in &dir.dirs {
            *out.entry(self.fold(&sub.name)).or_insert(0) += 1;
            self.collect_names(sub, out);
        }
        for file in &dir.files {
            *out.entry(self.fold(&file.name)).or_insert(0) += 1;
        }
    }

    fn collect_depths(&self, dir: &DirNode, depth: u32, out: &mut BTreeMap<String, Vec<u32>>) {
        for sub in &dir.dirs {
            out.entry(self.fold(&sub.name)).or_default().push(depth + 1);
            self.collect_depths(sub, depth + 1, out);
        }
        for file in &dir.files {
            out.entry(self.fold(&file.name)).or_default().push(depth + 1);
        }
    }
}
