//! Tree visitors applied after the topology is declared.

use crate::tree::{NodeId, ResourceTree};

/// A visitor invoked once per node of a [`ResourceTree`].
///
/// The visitor gets mutable access to the whole tree so it can patch nodes
/// other than the one being visited, e.g. a role found earlier in the walk.
pub trait Aspect {
    fn visit(&mut self, tree: &mut ResourceTree, node: NodeId);
}

impl ResourceTree {
    /// Run `aspect` over every node in pre-order.
    ///
    /// The node list is fixed before the first visit; nodes declared by the
    /// aspect itself are not visited.
    pub fn apply_aspect<A: Aspect + ?Sized>(&mut self, aspect: &mut A) {
        for id in self.preorder() {
            aspect.visit(self, id);
        }
    }

    /// Run `aspect` over the given nodes in exactly the given order.
    pub fn apply_aspect_in_order<A, I>(&mut self, aspect: &mut A, order: I)
    where
        A: Aspect + ?Sized,
        I: IntoIterator<Item = NodeId>,
    {
        for id in order {
            aspect.visit(self, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PathRecorder(Vec<String>);

    impl Aspect for PathRecorder {
        fn visit(&mut self, tree: &mut ResourceTree, node: NodeId) {
            if let Some(n) = tree.get(node) {
                self.0.push(n.path.clone());
            }
        }
    }

    #[test]
    fn test_visits_each_node_once_in_preorder() {
        let mut tree = ResourceTree::new("Root").unwrap();
        let a = tree.add_scope(tree.root(), "A").unwrap();
        tree.add_scope(a, "Leaf").unwrap();
        tree.add_scope(tree.root(), "B").unwrap();

        let mut recorder = PathRecorder(Vec::new());
        tree.apply_aspect(&mut recorder);
        assert_eq!(recorder.0, vec!["Root", "Root/A", "Root/A/Leaf", "Root/B"]);
    }

    #[test]
    fn test_explicit_order() {
        let mut tree = ResourceTree::new("Root").unwrap();
        let a = tree.add_scope(tree.root(), "A").unwrap();
        let b = tree.add_scope(tree.root(), "B").unwrap();

        let mut recorder = PathRecorder(Vec::new());
        tree.apply_aspect_in_order(&mut recorder, [b, a]);
        assert_eq!(recorder.0, vec!["Root/B", "Root/A"]);
    }
}
