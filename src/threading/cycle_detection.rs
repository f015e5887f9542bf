//! Cycle detection for reply links
//!
//! `In-Reply-To` headers come from the senders and can form loops (A replies
//! to B, B replies to A). Before a child is attached to a parent we make sure
//! the parent is not already below the child.
//!
//! Links are added one at a time and a node is only ever linked once, as a
//! child that is still the root of its own tree. Linking `child` under
//! `parent` therefore closes a loop exactly when `parent`'s tree is rooted at
//! `child`. [`TreeRoots`] answers "which tree is this node in" with a
//! path-compressed union-find, so checking a whole thread stays near linear
//! even for very long back-and-forth chains.

/// Tree membership of the nodes of a growing forest.
#[derive(Debug, Clone)]
pub struct TreeRoots {
    /// Points towards the tree root; roots point at themselves.
    up: Vec<usize>,
}

impl TreeRoots {
    /// `len` nodes, each the root of its own single-node tree.
    pub fn new(len: usize) -> Self {
        Self {
            up: (0..len).collect(),
        }
    }

    /// Root of the tree containing `node`.
    pub fn root_of(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.up[root] != root {
            root = self.up[root];
        }

        // Path compression
        let mut current = node;
        while self.up[current] != root {
            let next = self.up[current];
            self.up[current] = root;
            current = next;
        }

        root
    }

    /// Check if linking `child` under `parent` would create a cycle
    ///
    /// `child` must still be the root of its tree.
    ///
    /// ## Example
    ///
    /// ```text
    /// Current tree:  A → B → C
    ///
    /// Trying to link: A under C (would create cycle A → B → C → A)
    /// Result: true
    ///
    /// Trying to link: D under C (D is not in the tree)
    /// Result: false
    /// ```
    pub fn would_create_cycle(&mut self, child: usize, parent: usize) -> bool {
        self.root_of(parent) == child
    }

    /// Record that `child` (a tree root) now hangs under `parent`.
    pub fn link(&mut self, child: usize, parent: usize) {
        debug_assert_eq!(self.up[child], child, "only a root can be linked");
        self.up[child] = parent;
    }
}
