//! Turns the flat comment list of a post into reply trees.
//!
//! Nothing in here recurses, so a reply chain may be arbitrarily deep.

use chorus_common::model::{
    Id,
    comment::{Comment, CommentMarker},
};
use std::collections::HashMap;

#[derive(Debug)]
pub struct CommentThread {
    comment: Comment,
    replies: Vec<CommentThread>,
}

impl CommentThread {
    #[must_use]
    pub fn comment(&self) -> &Comment {
        &self.comment
    }

    /// Direct replies, oldest first.
    #[must_use]
    pub fn replies(&self) -> &[CommentThread] {
        &self.replies
    }

    /// Number of comments in this thread, the root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.walk().count()
    }

    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(0, self)],
        }
    }
}

impl Drop for CommentThread {
    fn drop(&mut self) {
        let mut detached = std::mem::take(&mut self.replies);
        while let Some(mut thread) = detached.pop() {
            detached.append(&mut thread.replies);
        }
    }
}

/// Depth-first, pre-order walk yielding each comment with its depth.
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    stack: Vec<(usize, &'a CommentThread)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Comment);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, thread) = self.stack.pop()?;
        self.stack
            .extend(thread.replies.iter().rev().map(|reply| (depth + 1, reply)));

        Some((depth, &thread.comment))
    }
}

/// Walks several threads one after another.
#[must_use]
pub fn walk(threads: &[CommentThread]) -> Walk<'_> {
    Walk {
        stack: threads.iter().rev().map(|thread| (0, thread)).collect(),
    }
}

/// Builds reply trees, keeping the input order among siblings.
///
/// A comment whose parent is missing from the input is shown at top level.
/// So is a comment caught in a parent cycle, which only corrupt data produces:
/// the first one in input order becomes the root of the rest.
#[must_use]
pub fn assemble(comments: Vec<Comment>) -> Vec<CommentThread> {
    let count = comments.len();

    let mut positions: HashMap<Id<CommentMarker>, usize> = HashMap::with_capacity(count);
    for (position, comment) in comments.iter().enumerate() {
        positions.entry(comment.id).or_insert(position);
    }

    let mut children = vec![Vec::new(); count];
    let mut roots = Vec::new();
    for (position, comment) in comments.iter().enumerate() {
        match comment.parent.and_then(|parent| positions.get(&parent).copied()) {
            Some(parent) if parent != position => children[parent].push(position),
            _ => roots.push(position),
        }
    }

    let mut visited = vec![false; count];
    let mut tree_children = vec![Vec::new(); count];
    let mut preorder = Vec::with_capacity(count);
    for &root in &roots {
        expand(root, &children, &mut visited, &mut tree_children, &mut preorder);
    }
    // Whatever is left hangs off a cycle.
    let mut position = 0;
    while preorder.len() < count {
        if !visited[position] {
            roots.push(position);
            expand(position, &children, &mut visited, &mut tree_children, &mut preorder);
        }
        position += 1;
    }

    // Children follow their parent in pre-order, so building in reverse
    // always finds the replies already built.
    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentThread>> = Vec::new();
    built.resize_with(count, || None);
    for &node in preorder.iter().rev() {
        let Some(comment) = slots[node].take() else {
            continue;
        };
        let replies = std::mem::take(&mut tree_children[node])
            .into_iter()
            .filter_map(|child| built[child].take())
            .collect();
        built[node] = Some(CommentThread { comment, replies });
    }

    roots
        .into_iter()
        .filter_map(|root| built[root].take())
        .collect()
}

/// Iterative pre-order expansion from `root`, recording which children each
/// node actually adopted.
fn expand(
    root: usize,
    children: &[Vec<usize>],
    visited: &mut [bool],
    tree_children: &mut [Vec<usize>],
    preorder: &mut Vec<usize>,
) {
    visited[root] = true;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        preorder.push(node);
        let fresh: Vec<usize> = children[node]
            .iter()
            .copied()
            .filter(|child| !visited[*child])
            .collect();
        for &child in &fresh {
            visited[child] = true;
        }
        stack.extend(fresh.iter().rev());
        tree_children[node] = fresh;
    }
}
