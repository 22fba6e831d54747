//! 依存グラフ
//!
//! サービスとその依存関係を保持し、構造を検証します。
//! 構築後は不変で、実行中は読み取り専用で共有されます。

use crate::error::GraphError;
use crate::model::ServiceNode;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// グラフに載せられるノード
pub trait GraphNode {
    fn name(&self) -> &str;
    fn depends_on(&self) -> &[String];
}

impl GraphNode for ServiceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// トラバーサルの向き
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 依存先から順に（起動）
    Up,
    /// 依存元から順に（破棄）
    Down,
}

/// 検証済みの依存グラフ
#[derive(Debug, Clone)]
pub struct DependencyGraph<N> {
    nodes: BTreeMap<String, N>,
    /// 宣言順
    order: Vec<String>,
    /// `edges[A] = [B, C]` は A が B と C に依存することを表す
    edges: HashMap<String, Vec<String>>,
    /// `reverse[A] = [B, C]` は B と C が A に依存することを表す
    reverse: HashMap<String, Vec<String>>,
}

impl<N: GraphNode> DependencyGraph<N> {
    /// ノード一覧からグラフを構築して検証する
    ///
    /// 名前の重複、未定義の依存先、循環依存をエラーにする。
    /// 循環が複数ある場合は最短のものを報告する。
    pub fn build(nodes: impl IntoIterator<Item = N>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        let mut order = Vec::new();

        for node in nodes {
            let name = node.name().to_string();
            if map.contains_key(&name) {
                return Err(GraphError::DuplicateService(name));
            }
            order.push(name.clone());
            map.insert(name, node);
        }

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for name in &order {
            edges.entry(name.clone()).or_default();
            reverse.entry(name.clone()).or_default();
        }

        for name in &order {
            let node = &map[name];
            let mut seen = HashSet::new();
            for dep in node.depends_on() {
                if !map.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        service: name.clone(),
                        missing: dep.clone(),
                    });
                }
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                edges.entry(name.clone()).or_default().push(dep.clone());
                reverse.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        for list in edges.values_mut().chain(reverse.values_mut()) {
            list.sort();
        }

        let graph = Self {
            nodes: map,
            order,
            edges,
            reverse,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::Cycle(cycle));
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&N> {
        self.nodes.get(name)
    }

    /// 宣言順のノード名
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// 直接の依存先
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 直接の依存元
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.reverse.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 指定方向で先に完了している必要があるノード
    pub fn predecessors(&self, name: &str, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => self.dependencies_of(name),
            Direction::Down => self.dependents_of(name),
        }
    }

    /// 指定方向で後に続くノード
    pub fn successors(&self, name: &str, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => self.dependents_of(name),
            Direction::Down => self.dependencies_of(name),
        }
    }

    /// 指定方向の辺をたどって到達できるノード（自身は含まない）
    pub fn reachable_from(&self, name: &str, direction: Direction) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);

        while let Some(current) = queue.pop_front() {
            for next in self.successors(current, direction) {
                if next != name && reached.insert(next.clone()) {
                    queue.push_back(next.as_str());
                }
            }
        }

        reached
    }

    /// 実行可能になる順にノード集合を返す（Kahn のアルゴリズム）
    ///
    /// 各集合は名前順にソートされる。全ノードが成功する前提の順序であり、
    /// 失敗時の挙動は [`Scheduler`](crate::Scheduler) が扱う。
    pub fn ready_sets(&self, direction: Direction) -> ReadySets<'_, N> {
        let remaining: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.predecessors(n, direction).len()))
            .collect();
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        ready.sort_unstable();

        ReadySets {
            graph: self,
            direction,
            remaining,
            ready,
        }
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        // 循環に関係しないノードを Kahn で取り除く
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.dependencies_of(n).len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut removed = HashSet::new();

        while let Some(node) = queue.pop_front() {
            removed.insert(node);
            for dependent in self.dependents_of(node) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if removed.len() == self.order.len() {
            return None;
        }

        let within: BTreeSet<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|n| !removed.contains(n))
            .collect();

        let mut shortest: Option<Vec<String>> = None;
        for start in &within {
            if let Some(cycle) = self.shortest_cycle_through(start, &within)
                && shortest.as_ref().is_none_or(|s| cycle.len() < s.len())
            {
                shortest = Some(cycle);
            }
        }
        shortest
    }

    /// `start` を通る最短の循環を幅優先探索で求める
    fn shortest_cycle_through(&self, start: &str, within: &BTreeSet<&str>) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for next in self.dependencies_of(current) {
                let next = next.as_str();
                if !within.contains(next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while cursor != start {
                        cursor = parent[cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    path.push(start);
                    return Some(path.into_iter().map(String::from).collect());
                }
                if visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        None
    }
}

/// [`DependencyGraph::ready_sets`] のイテレータ
pub struct ReadySets<'a, N> {
    graph: &'a DependencyGraph<N>,
    direction: Direction,
    remaining: HashMap<&'a str, usize>,
    ready: Vec<&'a str>,
}

impl<N: GraphNode> Iterator for ReadySets<'_, N> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ready.is_empty() {
            return None;
        }

        let current = std::mem::take(&mut self.ready);
        let mut next = Vec::new();
        for name in &current {
            for successor in self.graph.successors(name, self.direction) {
                if let Some(count) = self.remaining.get_mut(successor.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(successor.as_str());
                    }
                }
            }
        }
        next.sort_unstable();
        self.ready = next;

        Some(current.into_iter().map(String::from).collect())
    }
}
