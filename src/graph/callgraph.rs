//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::{ArenaMap, SecondarySet};
use crate::dense_arena_key;
use crate::ir::{CallSite, Func, Module};
use crate::pass::PassError;
use crate::utility::{SaHashMap, SaHashSet};
use smallvec::SmallVec;
use tracing::debug;

dense_arena_key! {
    /// Identifies one strongly-connected component of the [`CallGraph`].
    ///
    /// SCC identities are *retired* (never reused) when a split or merge
    /// changes the component structure; the replacement components get
    /// fresh keys, and cached analyses keyed by the retired identity are
    /// purged by the CGSCC layer.
    pub struct Scc;
}

/// A lightweight view of one SCC: its identity plus a snapshot of the member
/// functions, taken at the moment a pass is about to run over it.
///
/// This is the unit handed to SCC passes and analyses. It stays valid as a
/// *value* even if the underlying component is split or merged mid-pass; the
/// [`Scc`] key is how staleness is detected.
#[derive(Clone, Debug)]
pub struct SccUnit {
    scc: Scc,
    functions: SmallVec<[Func; 4]>,
}

impl SccUnit {
    /// The identity of the component.
    pub fn id(&self) -> Scc {
        self.scc
    }

    /// The member functions, in an arbitrary but stable order.
    pub fn functions(&self) -> &[Func] {
        &self.functions
    }

    /// Whether the component consists of a single function.
    pub fn is_singleton(&self) -> bool {
        self.functions.len() == 1
    }
}

/// Describes one structural change to the SCC partition, produced by the
/// incremental maintenance operations so the CGSCC layer can decide what
/// to revisit.
#[derive(Debug)]
pub enum SccUpdate {
    /// An edge removal broke a cycle: `of` was retired and replaced by
    /// `into`, ordered bottom-up (callees' components before callers').
    Split {
        /// The retired component.
        of: Scc,
        /// The replacement components in bottom-up order.
        into: SmallVec<[Scc; 2]>,
    },

    /// An edge addition formed a new cycle: every component on a path from
    /// the callee's back to the caller's collapsed into `into`.
    Merged {
        /// The surviving (new) component.
        into: Scc,
        /// The retired components it absorbed.
        absorbed: SmallVec<[Scc; 2]>,
    },

    /// A function was added to the graph as a new singleton component.
    NodeAdded {
        /// The new function.
        func: Func,
        /// Its singleton component.
        scc: Scc,
    },

    /// A function with no remaining callers was removed, retiring its
    /// singleton component.
    NodeRemoved {
        /// The removed function.
        func: Func,
        /// The retired component.
        scc: Scc,
    },
}

#[derive(Default)]
struct NodeData {
    out: SaHashMap<CallSite, Func>,
    ins: SaHashMap<CallSite, Func>,
}

/// The persistent call graph: one node per function, one edge per direct
/// call site, decomposed into strongly-connected components.
///
/// The graph is built once from a module's call sites and then mutated in
/// place through [`Self::add_edge`]/[`Self::remove_edge`]/[`Self::add_node`]/
/// [`Self::remove_node`] as transformations rewrite calls. Decomposition
/// after an edit is incremental: removals re-run Tarjan over the old
/// component's members only, additions check reachability between the two
/// endpoint components and collapse the cycle if one formed. A full rebuild
/// never happens after construction.
///
/// The SCC partition this maintains is always consistent with the current
/// edge set; [`Self::verify`] additionally checks the edge set against the
/// module's actual call sites.
pub struct CallGraph {
    nodes: SaHashMap<Func, NodeData>,
    edges: SaHashMap<CallSite, (Func, Func)>,
    sccs: ArenaMap<Scc, Option<Vec<Func>>>,
    scc_of: SaHashMap<Func, Scc>,
    // how many nodes the Tarjan runs have visited in total, so tests and
    // diagnostics can observe how much of the graph a re-decomposition saw
    visits: usize,
}

impl CallGraph {
    /// Builds the graph from every live function and call site in `module`
    /// and runs the initial full decomposition.
    pub fn build(module: &Module) -> Self {
        let mut graph = Self {
            nodes: SaHashMap::default(),
            edges: SaHashMap::default(),
            sccs: ArenaMap::default(),
            scc_of: SaHashMap::default(),
            visits: 0,
        };

        for func in module.functions() {
            graph.nodes.insert(func, NodeData::default());
        }

        for func in module.functions() {
            for (site, callee) in module.calls_of(func) {
                graph.insert_edge(site, func, callee);
            }
        }

        let everything: Vec<Func> = module.functions().collect();

        graph.decompose(&everything);

        graph
    }

    /// The component a function currently belongs to.
    pub fn scc_of(&self, func: Func) -> Scc {
        *self
            .scc_of
            .get(&func)
            .expect("function is not in the call graph")
    }

    /// The member functions of a live component.
    pub fn members(&self, scc: Scc) -> &[Func] {
        self.sccs
            .get(scc)
            .and_then(Option::as_ref)
            .expect("scc identity has been retired")
    }

    /// Whether a component identity is still current (not retired by a
    /// split or merge).
    pub fn is_live(&self, scc: Scc) -> bool {
        self.sccs.get(scc).map_or(false, Option::is_some)
    }

    /// Takes a membership snapshot of a live component.
    pub fn unit(&self, scc: Scc) -> SccUnit {
        SccUnit {
            scc,
            functions: SmallVec::from_slice(self.members(scc)),
        }
    }

    /// Returns the callees of `func`, one entry per live call site.
    pub fn callees(&self, func: Func) -> impl Iterator<Item = (CallSite, Func)> + '_ {
        self.node(func).out.iter().map(|(site, callee)| (*site, *callee))
    }

    /// Returns the callers of `func`, one entry per live call site.
    pub fn callers(&self, func: Func) -> impl Iterator<Item = (CallSite, Func)> + '_ {
        self.node(func).ins.iter().map(|(site, caller)| (*site, *caller))
    }

    /// The number of live components.
    pub fn live_scc_count(&self) -> usize {
        self.sccs.iter().filter(|(_, slot)| slot.is_some()).count()
    }

    /// Total number of nodes visited by SCC decompositions so far. The
    /// initial build visits every node once; incremental re-decompositions
    /// only add the nodes of the component they were scoped to.
    pub fn decomposition_visits(&self) -> usize {
        self.visits
    }

    /// Returns every live component in bottom-up order: a component always
    /// appears after every component it calls into.
    pub fn postorder(&self) -> Vec<Scc> {
        let mut order = Vec::with_capacity(self.live_scc_count());
        let mut seen: SaHashSet<Scc> = SaHashSet::default();

        for (scc, slot) in self.sccs.iter() {
            if slot.is_some() && !seen.contains(&scc) {
                self.postorder_from(scc, &mut seen, &mut order);
            }
        }

        order
    }

    fn postorder_from(&self, root: Scc, seen: &mut SaHashSet<Scc>, order: &mut Vec<Scc>) {
        seen.insert(root);

        let mut stack = vec![(root, self.scc_successors(root), 0usize)];

        while let Some((scc, successors, idx)) = stack.last_mut() {
            if *idx < successors.len() {
                let next = successors[*idx];

                *idx += 1;

                if seen.insert(next) {
                    let next_successors = self.scc_successors(next);

                    stack.push((next, next_successors, 0));
                }
            } else {
                order.push(*scc);
                stack.pop();
            }
        }
    }

    fn scc_successors(&self, scc: Scc) -> Vec<Scc> {
        let mut successors = Vec::new();
        let mut seen: SaHashSet<Scc> = SaHashSet::default();

        for &func in self.members(scc) {
            for callee in self.node(func).out.values() {
                let target = self.scc_of(*callee);

                if target != scc && seen.insert(target) {
                    successors.push(target);
                }
            }
        }

        successors
    }

    /// Adds a new function to the graph as its own singleton component.
    pub fn add_node(&mut self, func: Func) -> SccUpdate {
        debug_assert!(!self.nodes.contains_key(&func));

        self.nodes.insert(func, NodeData::default());

        let scc = self.sccs.insert(Some(vec![func]));

        self.scc_of.insert(func, scc);

        SccUpdate::NodeAdded { func, scc }
    }

    /// Removes a function from the graph, along with all of its outgoing
    /// edges. The function must have no callers left besides itself, which
    /// also means its component is a singleton.
    pub fn remove_node(&mut self, func: Func) -> SccUpdate {
        let data = self
            .nodes
            .remove(&func)
            .expect("function is not in the call graph");

        assert!(
            data.ins.values().all(|caller| *caller == func),
            "cannot remove a function that still has callers"
        );

        for (site, callee) in data.out {
            self.edges.remove(&site);

            if callee != func {
                self.nodes
                    .get_mut(&callee)
                    .expect("function is not in the call graph")
                    .ins
                    .remove(&site);
            }
        }

        let scc = self
            .scc_of
            .remove(&func)
            .expect("function is not in the call graph");

        debug_assert_eq!(self.members(scc), [func]);

        self.sccs[scc] = None;

        SccUpdate::NodeRemoved { func, scc }
    }

    /// Adds the edge for a new call site. If the edge closes a cycle between
    /// previously distinct components, every component on a path from the
    /// callee's back to the caller's is collapsed into one, and the merge is
    /// reported.
    pub fn add_edge(&mut self, site: CallSite, caller: Func, callee: Func) -> Option<SccUpdate> {
        self.insert_edge(site, caller, callee);

        if self.scc_of(caller) == self.scc_of(callee) {
            return None;
        }

        // a new cycle exists iff the callee can already reach the caller
        let forward = self.reachable_from(callee);

        if !forward.contains(&caller) {
            return None;
        }

        let backward = self.co_reachable_to(caller);

        // the new component is exactly the set of functions lying on some
        // callee -> caller path; old components are always wholly inside it
        let merged: Vec<Func> = forward
            .iter()
            .copied()
            .filter(|func| backward.contains(func))
            .collect();

        let mut absorbed: SmallVec<[Scc; 2]> = SmallVec::new();

        for &func in &merged {
            let old = self.scc_of(func);

            if !absorbed.contains(&old) {
                absorbed.push(old);
            }
        }

        let into = self.sccs.insert(Some(merged.clone()));

        for func in merged {
            self.scc_of.insert(func, into);
        }

        for &old in &absorbed {
            self.sccs[old] = None;
        }

        debug!(merged = ?into, absorbed = absorbed.len(), "call graph components merged");

        Some(SccUpdate::Merged { into, absorbed })
    }

    /// Removes the edge for a deleted call site. If the edge was internal to
    /// a component, the component's members are re-decomposed (and nothing
    /// else is visited); a genuine split retires the old identity and
    /// reports the pieces bottom-up.
    pub fn remove_edge(&mut self, site: CallSite) -> Option<SccUpdate> {
        let (caller, callee) = self
            .edges
            .remove(&site)
            .expect("call site has no edge in the graph");

        self.node_mut(caller).out.remove(&site);
        self.node_mut(callee).ins.remove(&site);

        // an edge between two components can't have been part of a cycle
        if self.scc_of(caller) != self.scc_of(callee) {
            return None;
        }

        let of = self.scc_of(caller);
        let scope = self.sccs[of].take().expect("scc identity has been retired");
        let into = self.decompose(&scope);

        if into.len() == 1 {
            // the component survived intact (the edge was redundant inside
            // the cycle); restore the original identity so caches survive
            let members = self.sccs[into[0]].take().expect("scc identity has been retired");

            for &func in &members {
                self.scc_of.insert(func, of);
            }

            self.sccs[of] = Some(members);

            return None;
        }

        debug!(split = ?of, pieces = into.len(), "call graph component split");

        Some(SccUpdate::Split { of, into })
    }

    /// Checks that the graph's edges exactly mirror the live call sites in
    /// `module`. A mismatch means some transformation mutated calls without
    /// notifying the graph, which voids the bottom-up ordering guarantee.
    pub fn verify(&self, module: &Module) -> Result<(), PassError> {
        let mut live = 0usize;

        for func in module.functions() {
            live += 1;

            let node = self.nodes.get(&func).ok_or_else(|| {
                PassError::GraphDesync(format!(
                    "function `{}` has no call graph node",
                    module.function(func).name()
                ))
            })?;

            let expected: SaHashMap<CallSite, Func> = module.calls_of(func).collect();

            if expected != node.out {
                return Err(PassError::GraphDesync(format!(
                    "call sites of `{}` do not match its edges",
                    module.function(func).name()
                )));
            }
        }

        if live != self.nodes.len() {
            return Err(PassError::GraphDesync(
                "graph contains nodes for functions not in the module".to_owned(),
            ));
        }

        Ok(())
    }

    fn node(&self, func: Func) -> &NodeData {
        self.nodes
            .get(&func)
            .expect("function is not in the call graph")
    }

    fn node_mut(&mut self, func: Func) -> &mut NodeData {
        self.nodes
            .get_mut(&func)
            .expect("function is not in the call graph")
    }

    fn insert_edge(&mut self, site: CallSite, caller: Func, callee: Func) {
        self.edges.insert(site, (caller, callee));
        self.node_mut(caller).out.insert(site, callee);
        self.node_mut(callee).ins.insert(site, caller);
    }

    fn reachable_from(&self, start: Func) -> SaHashSet<Func> {
        let mut seen: SaHashSet<Func> = SaHashSet::default();
        let mut stack = vec![start];

        seen.insert(start);

        while let Some(func) = stack.pop() {
            for &callee in self.node(func).out.values() {
                if seen.insert(callee) {
                    stack.push(callee);
                }
            }
        }

        seen
    }

    fn co_reachable_to(&self, target: Func) -> SaHashSet<Func> {
        let mut seen: SaHashSet<Func> = SaHashSet::default();
        let mut stack = vec![target];

        seen.insert(target);

        while let Some(func) = stack.pop() {
            for &caller in self.node(func).ins.values() {
                if seen.insert(caller) {
                    stack.push(caller);
                }
            }
        }

        seen
    }

    // Tarjan's algorithm, iterative, restricted to `scope`: edges leaving the
    // scope are ignored, and only scoped nodes are visited or reassigned.
    // Components are created in the order Tarjan emits them, which is
    // bottom-up (an SCC pops only after everything it reaches has popped).
    fn decompose(&mut self, scope: &[Func]) -> SmallVec<[Scc; 2]> {
        struct Frame {
            func: Func,
            successors: Vec<Func>,
            idx: usize,
        }

        let mut in_scope: SecondarySet<Func> = SecondarySet::new();

        for &func in scope {
            in_scope.insert(func);
        }

        let mut index: SaHashMap<Func, u32> = SaHashMap::default();
        let mut lowlink: SaHashMap<Func, u32> = SaHashMap::default();
        let mut on_stack: SecondarySet<Func> = SecondarySet::new();
        let mut stack: Vec<Func> = Vec::new();
        let mut created: SmallVec<[Scc; 2]> = SmallVec::new();
        let mut next_index = 0u32;

        for &root in scope {
            if index.contains_key(&root) {
                continue;
            }

            index.insert(root, next_index);
            lowlink.insert(root, next_index);
            next_index += 1;
            self.visits += 1;
            stack.push(root);
            on_stack.insert(root);

            let successors: Vec<Func> = self.nodes[&root]
                .out
                .values()
                .copied()
                .filter(|callee| in_scope.contains(*callee))
                .collect();

            let mut frames = vec![Frame {
                func: root,
                successors,
                idx: 0,
            }];

            while let Some(frame) = frames.last_mut() {
                if frame.idx < frame.successors.len() {
                    let next = frame.successors[frame.idx];

                    frame.idx += 1;

                    if !index.contains_key(&next) {
                        index.insert(next, next_index);
                        lowlink.insert(next, next_index);
                        next_index += 1;
                        self.visits += 1;
                        stack.push(next);
                        on_stack.insert(next);

                        let successors: Vec<Func> = self.nodes[&next]
                            .out
                            .values()
                            .copied()
                            .filter(|callee| in_scope.contains(*callee))
                            .collect();

                        frames.push(Frame {
                            func: next,
                            successors,
                            idx: 0,
                        });
                    } else if on_stack.contains(next) {
                        let low = lowlink[&frame.func].min(index[&next]);

                        lowlink.insert(frame.func, low);
                    }
                } else {
                    let func = frame.func;
                    let low = lowlink[&func];

                    if low == index[&func] {
                        let mut members = Vec::new();

                        loop {
                            let popped = stack.pop().expect("tarjan stack underflow");

                            on_stack.remove(popped);
                            members.push(popped);

                            if popped == func {
                                break;
                            }
                        }

                        let scc = self.sccs.insert(Some(members.clone()));

                        for member in members {
                            self.scc_of.insert(member, scc);
                        }

                        created.push(scc);
                    }

                    frames.pop();

                    if let Some(parent) = frames.last() {
                        let parent_low = lowlink[&parent.func].min(low);

                        lowlink.insert(parent.func, parent_low);
                    }
                }
            }
        }

        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_cycle() -> (Module, Func, Func, Func) {
        // f -> g -> h -> f
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);
        let h = module.add_function("h", 3);

        module.add_call(f, g);
        module.add_call(g, h);
        module.add_call(h, f);

        (module, f, g, h)
    }

    #[test]
    fn a_cycle_is_one_component() {
        let (module, f, g, h) = module_with_cycle();
        let graph = CallGraph::build(&module);

        assert_eq!(graph.live_scc_count(), 1);
        assert_eq!(graph.scc_of(f), graph.scc_of(g));
        assert_eq!(graph.scc_of(g), graph.scc_of(h));
        assert_eq!(graph.decomposition_visits(), 3);
    }

    #[test]
    fn postorder_is_callee_first() {
        // a -> b -> c, no cycle
        let mut module = Module::new("m");
        let a = module.add_function("a", 1);
        let b = module.add_function("b", 2);
        let c = module.add_function("c", 3);

        module.add_call(a, b);
        module.add_call(b, c);

        let graph = CallGraph::build(&module);
        let order: Vec<Func> = graph
            .postorder()
            .into_iter()
            .map(|scc| graph.members(scc)[0])
            .collect();

        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn breaking_a_cycle_splits_into_singletons_bottom_up() {
        let (mut module, f, g, h) = module_with_cycle();

        // unrelated, disjoint component
        let i = module.add_function("i", 1);
        let j = module.add_function("j", 1);
        module.add_call(i, j);

        let closing = module
            .calls_of(h)
            .find(|(_, callee)| *callee == f)
            .map(|(site, _)| site)
            .unwrap();

        let mut graph = CallGraph::build(&module);
        let visits_after_build = graph.decomposition_visits();

        module.remove_call(closing);

        let update = graph.remove_edge(closing).unwrap();

        let into = match update {
            SccUpdate::Split { of: _, into } => into,
            other => panic!("expected a split, got {other:?}"),
        };

        // three singletons, callees before callers: h, g, f
        let order: Vec<Func> = into.iter().map(|scc| graph.members(*scc)[0]).collect();

        assert_eq!(order, vec![h, g, f]);

        // only the old component's three members were visited again
        assert_eq!(graph.decomposition_visits(), visits_after_build + 3);

        graph.verify(&module).unwrap();
    }

    #[test]
    fn removing_a_redundant_edge_keeps_the_component() {
        let (mut module, f, g, _) = module_with_cycle();

        // a second f -> g edge; removing it changes nothing structurally
        let extra = module.add_call(f, g);

        let mut graph = CallGraph::build(&module);
        let before = graph.scc_of(f);

        module.remove_call(extra);

        assert!(graph.remove_edge(extra).is_none());
        assert_eq!(graph.scc_of(f), before);
        assert!(graph.is_live(before));
    }

    #[test]
    fn a_cycle_closing_edge_merges_components() {
        // f <-> g cycle, h -> f; then g -> h closes a bigger cycle
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);
        let h = module.add_function("h", 3);

        module.add_call(f, g);
        module.add_call(g, f);
        module.add_call(h, f);

        let mut graph = CallGraph::build(&module);

        assert_eq!(graph.live_scc_count(), 2);

        let site = module.add_call(g, h);
        let update = graph.add_edge(site, g, h).unwrap();

        match update {
            SccUpdate::Merged { into, absorbed } => {
                assert_eq!(absorbed.len(), 2);
                assert_eq!(graph.members(into).len(), 3);
                assert!(!graph.is_live(absorbed[0]));
            }
            other => panic!("expected a merge, got {other:?}"),
        }

        assert_eq!(graph.scc_of(f), graph.scc_of(h));
        graph.verify(&module).unwrap();
    }

    #[test]
    fn an_acyclic_edge_does_not_merge() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);

        let mut graph = CallGraph::build(&module);

        let site = module.add_call(f, g);

        assert!(graph.add_edge(site, f, g).is_none());
        assert_ne!(graph.scc_of(f), graph.scc_of(g));
    }

    #[test]
    fn node_removal_retires_the_singleton() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);

        let site = module.add_call(f, g);

        let mut graph = CallGraph::build(&module);

        // f calls g, so f (the caller) can go away
        let f_scc = graph.scc_of(f);

        module.remove_call(site);
        graph.remove_edge(site);
        module.remove_function(f);

        match graph.remove_node(f) {
            SccUpdate::NodeRemoved { func, scc } => {
                assert_eq!(func, f);
                assert_eq!(scc, f_scc);
            }
            other => panic!("expected a node removal, got {other:?}"),
        }

        assert!(!graph.is_live(f_scc));
        graph.verify(&module).unwrap();
    }

    #[test]
    fn verify_catches_unannounced_call_sites() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);

        let graph = CallGraph::build(&module);

        // mutate the module behind the graph's back
        module.add_call(f, g);

        assert!(graph.verify(&module).is_err());
    }
}
