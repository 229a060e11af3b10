//! In-memory aggregation model built by the [`crate::preprocessor::Preprocessor`]
//!
//! This module holds only plain value aggregates (per spec.md §9: "no inheritance is
//! warranted"). The [`crate::preprocessor::Preprocessor`] owns one [`FunctionTable`], one
//! [`ProxyQueues`] and one `Vec<String>` of header lines for the duration of a single run; none
//! of it is process-global.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

/// The dense, first-observation-order index assigned to a function name
pub type FunctionIndex = u32;

/// The composite key of a caller/callee edge: the other end of the edge, and the call-site line
///
/// Used both as `calledFrom[(callerIndex, line)]` and `subCalls[(calleeIndex, line)]` - a pair
/// key, not the source's concatenated-decimal-string encoding (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    /// The caller's index when this key lives in a `calledFrom` map, the callee's index when it
    /// lives in a `subCalls` map
    pub other: FunctionIndex,
    /// The source line of the call site
    pub line: u32,
}

/// The statistics accumulated for one caller/callee edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeStats {
    /// How many times this edge was observed
    pub call_count: u32,
    /// The summed cost attributed to this edge across all observations
    pub summed_call_cost: u64,
}

impl EdgeStats {
    /// Fold one more observed call of `cost` into this edge
    pub fn record(&mut self, cost: u64) {
        self.call_count += 1;
        self.summed_call_cost += cost;
    }
}

/// The aggregated statistics for a single function
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    /// The function's resolved name
    pub name: String,
    /// The resolved file the function's first observed invocation was attributed to
    pub filename: String,
    /// The source line of the function's first observed invocation
    pub line: u32,
    /// How many times this function was invoked directly (had its own `fl=/fn=/cost` triplet)
    pub invocation_count: u32,
    /// The sum of this function's direct self costs
    pub summed_self_cost: u64,
    /// Self cost plus the cost of all observed sub-calls
    pub summed_inclusive_cost: u64,
    /// Edges keyed by `(callerIndex, callerLine)`, dual to some other function's `sub_calls`
    pub called_from: IndexMap<EdgeKey, EdgeStats>,
    /// Edges keyed by `(calleeIndex, callLine)`, dual to some other function's `called_from`
    pub sub_calls: IndexMap<EdgeKey, EdgeStats>,
    /// Whether this function's own `fl=/fn=/cost` triplet has been observed yet
    ///
    /// A function can be allocated an index purely as the target of a `cfn=` edge before its own
    /// block is ever seen (or without one appearing at all); `filename`/`line` stay at their
    /// defaults until that happens.
    seeded: bool,
}

impl FunctionRecord {
    fn new(name: String) -> Self {
        Self {
            name,
            filename: String::new(),
            line: 0,
            invocation_count: 0,
            summed_self_cost: 0,
            summed_inclusive_cost: 0,
            called_from: IndexMap::new(),
            sub_calls: IndexMap::new(),
            seeded: false,
        }
    }
}

/// The mapping from function-name string to dense integer index, plus every function's record
///
/// Indices are contiguous `[0, N)`, assigned in first-observation order of the function name
/// (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    records: Vec<FunctionRecord>,
    index_of: IndexMap<String, FunctionIndex>,
}

impl FunctionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index of `name`, allocating a new one (with a placeholder record) in
    /// first-observation order if unseen
    pub fn index_of(&mut self, name: &str) -> FunctionIndex {
        if let Some(index) = self.index_of.get(name) {
            return *index;
        }

        let index = self.records.len() as FunctionIndex;
        self.index_of.insert(name.to_owned(), index);
        self.records.push(FunctionRecord::new(name.to_owned()));
        index
    }

    /// Record one observed invocation from this function's own `fl=/fn=/cost` triplet
    ///
    /// On the first call for a given `index` this seeds `filename`/`line`; later calls only
    /// accumulate the counters, per spec.md §4.2.
    pub fn record_own_invocation(&mut self, index: FunctionIndex, filename: String, line: u32, cost: u64) {
        let record = self.record_mut(index);
        if !record.seeded {
            record.filename = filename;
            record.line = line;
            record.seeded = true;
        }
        record.invocation_count += 1;
        record.summed_self_cost += cost;
        record.summed_inclusive_cost += cost;
    }

    /// Borrow a function's record
    pub fn record(&self, index: FunctionIndex) -> &FunctionRecord {
        &self.records[index as usize]
    }

    /// Mutably borrow a function's record
    pub fn record_mut(&mut self, index: FunctionIndex) -> &mut FunctionRecord {
        &mut self.records[index as usize]
    }

    /// The number of distinct functions observed so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Return true if no function has been observed yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records in index order
    pub fn iter(&self) -> impl Iterator<Item = (FunctionIndex, &FunctionRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (i as FunctionIndex, r))
    }

    /// Upsert the dual edges for one (possibly proxy-substituted) call
    ///
    /// Adds `cost` to the caller's inclusive cost, then records the edge on both sides.
    pub fn record_call(&mut self, caller: FunctionIndex, callee: FunctionIndex, line: u32, cost: u64) {
        self.record_mut(caller).summed_inclusive_cost += cost;

        self.record_mut(callee)
            .called_from
            .entry(EdgeKey { other: caller, line })
            .or_default()
            .record(cost);

        self.record_mut(caller)
            .sub_calls
            .entry(EdgeKey { other: callee, line })
            .or_default()
            .record(cost);
    }
}

/// One pending substitution recorded while a proxy function was called
#[derive(Debug, Clone, Copy)]
pub struct ProxyCall {
    /// The real callee invoked inside the proxy's body
    pub callee: FunctionIndex,
    /// The line, inside the proxy's body, of the real call
    pub line: u32,
    /// The cost attributed to the real call
    pub cost: u64,
}

/// The FIFO queues of pending proxy substitutions, one per proxy function index
///
/// A queue is filled when a proxy is called (the caller is itself a proxy, see spec.md §4.2) and
/// drained, one entry per "called a proxy" event, when something calls through that proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyQueues {
    by_proxy: IndexMap<FunctionIndex, VecDeque<ProxyCall>>,
}

impl ProxyQueues {
    /// Create empty queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a pending substitution for `proxy`
    pub fn enqueue(&mut self, proxy: FunctionIndex, call: ProxyCall) {
        self.by_proxy.entry(proxy).or_default().push_back(call);
    }

    /// Dequeue the oldest pending substitution for `proxy`, if any
    pub fn dequeue(&mut self, proxy: FunctionIndex) -> Option<ProxyCall> {
        self.by_proxy.get_mut(&proxy).and_then(VecDeque::pop_front)
    }
}

/// The configured set of function names treated as transparent proxies
#[derive(Debug, Clone, Default)]
pub struct ProxyFunctions(IndexSet<String>);

impl ProxyFunctions {
    /// Build the set from an iterator of function names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Return true if `name` is configured as a proxy
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_index_assignment_is_first_observation_order() {
        let mut table = FunctionTable::new();
        let a = table.index_of("a");
        let b = table.index_of("b");
        let a_again = table.index_of("a");

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a_again, 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_edge_duality_after_record_call() {
        let mut table = FunctionTable::new();
        let caller = table.index_of("{main}");
        table.record_own_invocation(caller, "main.php".to_owned(), 10, 5);
        let callee = table.index_of("foo");
        table.record_own_invocation(callee, "main.php".to_owned(), 20, 2);

        table.record_call(caller, callee, 7, 3);

        let callee_edge = table.record(callee).called_from[&EdgeKey { other: caller, line: 7 }];
        let caller_edge = table.record(caller).sub_calls[&EdgeKey { other: callee, line: 7 }];
        assert_eq!(callee_edge, caller_edge);
        assert_eq!(callee_edge.call_count, 1);
        assert_eq!(callee_edge.summed_call_cost, 3);
        assert_eq!(table.record(caller).summed_inclusive_cost, 5 + 3);
    }

    #[test]
    fn test_proxy_queue_is_fifo() {
        let mut queues = ProxyQueues::new();
        queues.enqueue(0, ProxyCall { callee: 1, line: 10, cost: 100 });
        queues.enqueue(0, ProxyCall { callee: 2, line: 20, cost: 200 });

        let first = queues.dequeue(0).unwrap();
        assert_eq!(first.callee, 1);
        let second = queues.dequeue(0).unwrap();
        assert_eq!(second.callee, 2);
        assert!(queues.dequeue(0).is_none());
    }
}
