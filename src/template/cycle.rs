//! Static detection of state loops.
//!
//! `Continue` with a state change is allowed, but only when the resulting state graph cannot
//! revisit a state without consuming input. The check builds a directed graph over the states:
//! a `Continue` transition contributes a `Transition` edge, a `Next` transition a `Link` edge,
//! and a `Transition` edge supersedes a `Link` edge between the same pair. Nodes that cannot
//! take part in a loop (no incoming or no outgoing `Transition` to a live neighbor) are marked
//! as stubs until the marking stabilizes; a breadth-first walk from the root then reports the
//! first path that revisits a node.

use std::collections::{HashMap, HashSet, VecDeque};

use super::rules::{LineAction, Rule, RuleAction};
use super::states::TemplateState;
use super::StateId;
use crate::error::ParseErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Link,
    Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    neighbor: usize,
    kind: EdgeKind,
}

#[derive(Debug)]
struct Node {
    state: StateId,
    stub: bool,
    distance: i64,
    out: Vec<Edge>,
    inc: Vec<Edge>,
}

/// Returns an error if the transition graph admits a loop that consumes no input.
pub(crate) fn detect(
    states: &[TemplateState],
    rules: &[Rule],
    user_states: &HashSet<StateId>,
) -> Result<(), ParseErrorKind> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut index: HashMap<StateId, usize> = HashMap::new();

    let node_for = |state: StateId, nodes: &mut Vec<Node>, index: &mut HashMap<StateId, usize>| -> usize {
        *index.entry(state).or_insert_with(|| {
            nodes.push(Node { state, stub: false, distance: -1, out: Vec::new(), inc: Vec::new() });
            nodes.len() - 1
        })
    };

    for (state_id, state) in states.iter().enumerate() {
        if state.name == "End" || state.name == "EOF" {
            continue;
        }

        let from = node_for(state_id, &mut nodes, &mut index);

        for &rule_id in &state.own {
            let rule = &rules[rule_id];
            let Some(RuleAction::ChangeState(target)) = &rule.action else { continue };

            let to = node_for(*target, &mut nodes, &mut index);
            let kind = match rule.line_action {
                LineAction::Continue => EdgeKind::Transition,
                LineAction::Next => EdgeKind::Link,
            };

            // a Transition between the same pair supersedes a Link
            if kind == EdgeKind::Link
                && nodes[from].out.contains(&Edge { neighbor: to, kind: EdgeKind::Transition })
            {
                continue;
            }
            if kind == EdgeKind::Transition {
                nodes[from].out.retain(|edge| *edge != Edge { neighbor: to, kind: EdgeKind::Link });
                nodes[to].inc.retain(|edge| *edge != Edge { neighbor: from, kind: EdgeKind::Link });
            }

            if !nodes[from].out.contains(&Edge { neighbor: to, kind }) {
                nodes[from].out.push(Edge { neighbor: to, kind });
                nodes[to].inc.push(Edge { neighbor: from, kind });
            }
        }
    }

    let Some(&start) = states
        .iter()
        .position(|state| state.name == "Start")
        .and_then(|state_id| index.get(&state_id))
    else {
        return Ok(());
    };

    mark_stubs(&mut nodes);
    set_distances(&mut nodes, start);

    // order nodes Start-first, then by distance from Start, then by name
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by_key(|&n| {
        let name = &states[nodes[n].state].name;
        (name != "Start", nodes[n].distance, name.clone())
    });

    let Some(&root) = order.iter().find(|&&n| !nodes[n].stub) else {
        return Ok(());
    };

    let Some((link_from, link_to, history)) = find_cycle(&nodes, root) else {
        return Ok(());
    };

    let path: Vec<&str> = history.iter().map(|&n| states[nodes[n].state].name.as_str()).collect();

    // report the first rule that creates the closing edge
    let from_state = nodes[link_from].state;
    let to_state = nodes[link_to].state;
    let rule = rules
        .iter()
        .find(|rule| {
            rule.state == from_state && matches!(rule.action, Some(RuleAction::ChangeState(target)) if target == to_state)
        })
        .map(|rule| rule.render(states, user_states).replace('\n', " ").trim_start().to_string())
        .unwrap_or_default();

    Err(ParseErrorKind::StateLoop {
        path: path.join(" > "),
        state: states[from_state].name.clone(),
        rule,
    })
}

fn mark_stubs(nodes: &mut [Node]) {
    let mut recheck: HashSet<usize> = (0..nodes.len()).collect();
    while !recheck.is_empty() {
        let check: Vec<usize> = recheck.drain().collect();
        for n in check {
            if nodes[n].stub {
                continue;
            }

            let no_live_out = nodes[n]
                .out
                .iter()
                .all(|edge| edge.kind != EdgeKind::Transition || nodes[edge.neighbor].stub);
            let no_live_inc = nodes[n]
                .inc
                .iter()
                .all(|edge| edge.kind != EdgeKind::Transition || nodes[edge.neighbor].stub);

            if no_live_out || no_live_inc {
                nodes[n].stub = true;

                let touched: Vec<usize> = nodes[n]
                    .inc
                    .iter()
                    .chain(nodes[n].out.iter())
                    .map(|edge| edge.neighbor)
                    .filter(|&neighbor| !nodes[neighbor].stub)
                    .collect();
                recheck.extend(touched);
            }
        }
    }
}

fn set_distances(nodes: &mut [Node], start: usize) {
    let mut queue = VecDeque::new();
    nodes[start].distance = 0;
    queue.push_back(start);

    while let Some(n) = queue.pop_front() {
        let distance = nodes[n].distance;
        let neighbors: Vec<usize> = nodes[n].out.iter().map(|edge| edge.neighbor).collect();
        for neighbor in neighbors {
            if nodes[neighbor].distance == -1 {
                nodes[neighbor].distance = distance + 1;
                queue.push_back(neighbor);
            }
        }
    }
}

/// Breadth-first search carrying the per-path node history. The first revisited node closes
/// the cycle; the returned history includes it at both ends.
fn find_cycle(nodes: &[Node], root: usize) -> Option<(usize, usize, Vec<usize>)> {
    let mut queue: VecDeque<(usize, Vec<usize>)> = VecDeque::new();
    queue.push_back((root, vec![root]));

    while let Some((n, history)) = queue.pop_front() {
        if nodes[n].stub {
            continue;
        }

        for edge in &nodes[n].out {
            if nodes[edge.neighbor].stub || edge.kind != EdgeKind::Transition {
                continue;
            }

            if history.contains(&edge.neighbor) {
                let mut cycle = history.clone();
                cycle.push(edge.neighbor);
                return Some((n, edge.neighbor, cycle));
            }

            let mut next = history.clone();
            next.push(edge.neighbor);
            queue.push_back((edge.neighbor, next));
        }
    }

    None
}
