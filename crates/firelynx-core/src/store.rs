//! In-memory, bounded history of transactions (spec.md §3, "TransactionStore").

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use parking_lot::RwLock;

use crate::transaction::{ConfigPayload, Source, Transaction, TransactionId, TransactionState};

/// A state filter as supplied by a query caller. Unrecognized values match
/// nothing rather than erroring, per spec.md §4.5 ("unrecognized state values
/// match nothing").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Any,
    Exactly(TransactionState),
    Unrecognized,
}

impl FromStr for StateFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => StateFilter::Exactly(TransactionState::Created),
            "valid" => StateFilter::Exactly(TransactionState::Valid),
            "prepared" => StateFilter::Exactly(TransactionState::Prepared),
            "committed" => StateFilter::Exactly(TransactionState::Committed),
            "compensated" => StateFilter::Exactly(TransactionState::Compensated),
            "failed" => StateFilter::Exactly(TransactionState::Failed),
            _ => StateFilter::Unrecognized,
        })
    }
}

impl StateFilter {
    fn matches(self, state: TransactionState) -> bool {
        match self {
            StateFilter::Any => true,
            StateFilter::Exactly(s) => s == state,
            StateFilter::Unrecognized => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    Any,
    Exactly(Source),
}

impl SourceFilter {
    fn matches(self, source: Source) -> bool {
        match self {
            SourceFilter::Any => true,
            SourceFilter::Exactly(s) => s == source,
        }
    }
}

/// Opaque pagination token: encodes the id of the last item already
/// returned. `None` means "start from the beginning".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken(pub Option<TransactionId>);

impl PageToken {
    pub fn start() -> Self {
        Self(None)
    }

    pub fn encode(self) -> String {
        match self.0 {
            Some(id) => id.to_string(),
            None => String::new(),
        }
    }

    pub fn decode(s: &str) -> Self {
        if s.is_empty() {
            Self(None)
        } else {
            Self(TransactionId::from_str(s).ok())
        }
    }
}

pub struct Page<C> {
    pub items: Vec<Transaction<C>>,
    pub next_page_token: Option<PageToken>,
}

struct Inner<C> {
    order: VecDeque<TransactionId>,
    by_id: HashMap<TransactionId, Transaction<C>>,
    terminal_order: VecDeque<TransactionId>,
    current: Option<TransactionId>,
    max_history: usize,
}

/// Ordered, `id`-indexed transaction history with terminal-only, bounded
/// eviction (spec.md §3, §4.5 "Clear").
pub struct TransactionStore<C> {
    inner: RwLock<Inner<C>>,
}

impl<C: ConfigPayload> TransactionStore<C> {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                order: VecDeque::new(),
                by_id: HashMap::new(),
                terminal_order: VecDeque::new(),
                current: None,
                max_history,
            }),
        }
    }

    /// Record a transaction (on creation, or to persist any later mutation).
    /// Inserting a transaction whose `id` is already present replaces it in
    /// place, preserving its original position in `order`.
    pub fn upsert(&self, tx: Transaction<C>) {
        let mut inner = self.inner.write();
        let id = tx.id();
        let state = tx.state();
        let is_new = !inner.by_id.contains_key(&id);

        if state == TransactionState::Committed {
            inner.current = Some(id);
        }

        inner.by_id.insert(id, tx);
        if is_new {
            inner.order.push_back(id);
        }
        if state.is_terminal() && !inner.terminal_order.contains(&id) {
            inner.terminal_order.push_back(id);
        }

        Self::evict_if_needed(&mut inner);
    }

    fn evict_if_needed(inner: &mut Inner<C>) {
        while inner.by_id.len() > inner.max_history {
            let Some(victim) = Self::pick_eviction_victim(inner) else {
                break;
            };
            inner.by_id.remove(&victim);
            inner.order.retain(|id| *id != victim);
            inner.terminal_order.retain(|id| *id != victim);
        }
    }

    /// Oldest terminal transaction that is not the current committed one.
    fn pick_eviction_victim(inner: &Inner<C>) -> Option<TransactionId> {
        inner
            .terminal_order
            .iter()
            .copied()
            .find(|id| Some(*id) != inner.current)
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction<C>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn get_current(&self) -> Option<Transaction<C>> {
        let inner = self.inner.read();
        inner.current.and_then(|id| inner.by_id.get(&id).cloned())
    }

    pub fn list(
        &self,
        page_token: PageToken,
        page_size: usize,
        state_filter: StateFilter,
        source_filter: SourceFilter,
    ) -> Page<C> {
        let inner = self.inner.read();
        let start_idx = match page_token.0 {
            None => 0,
            Some(after) => inner
                .order
                .iter()
                .position(|id| *id == after)
                .map(|i| i + 1)
                .unwrap_or(inner.order.len()),
        };

        let mut items = Vec::new();
        let mut last_seen = None;
        let mut idx = start_idx;
        while idx < inner.order.len() {
            let id = inner.order[idx];
            idx += 1;
            let tx = &inner.by_id[&id];
            if state_filter.matches(tx.state()) && source_filter.matches(tx.source()) {
                items.push(tx.clone());
                last_seen = Some(id);
                if items.len() >= page_size {
                    break;
                }
            }
        }

        let next_page_token = if idx < inner.order.len() {
            last_seen.map(|id| PageToken(Some(id)))
        } else {
            None
        };

        Page {
            items,
            next_page_token,
        }
    }

    /// Remove the oldest eligible (terminal, non-current) transactions so
    /// that at most `keep_last` terminal transactions remain. Returns the
    /// count removed.
    pub fn clear(&self, keep_last: usize) -> usize {
        let mut inner = self.inner.write();
        let mut eligible: Vec<TransactionId> = inner
            .terminal_order
            .iter()
            .copied()
            .filter(|id| Some(*id) != inner.current)
            .collect();

        let remove_count = eligible.len().saturating_sub(keep_last);
        eligible.truncate(remove_count);

        for id in &eligible {
            inner.by_id.remove(id);
            inner.order.retain(|x| x != id);
            inner.terminal_order.retain(|x| x != id);
        }

        eligible.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Source;

    #[derive(Debug, Clone)]
    struct Dummy;
    impl ConfigPayload for Dummy {
        fn validate(&self) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    fn terminal_tx(state: TransactionState) -> Transaction<Dummy> {
        let mut tx = Transaction::new(Source::Test, "", "", Dummy);
        match state {
            TransactionState::Failed => tx.transition(TransactionState::Failed),
            TransactionState::Compensated => {
                tx.transition(TransactionState::Valid);
                tx.transition(TransactionState::Prepared);
                tx.transition(TransactionState::Compensated);
            }
            TransactionState::Committed => {
                tx.transition(TransactionState::Valid);
                tx.transition(TransactionState::Prepared);
                tx.transition(TransactionState::Committed);
            }
            _ => {}
        }
        tx
    }

    #[test]
    fn current_is_most_recent_committed() {
        let store = TransactionStore::new(100);
        let a = terminal_tx(TransactionState::Committed);
        let a_id = a.id();
        store.upsert(a);
        let b = terminal_tx(TransactionState::Failed);
        store.upsert(b);
        assert_eq!(store.get_current().unwrap().id(), a_id);
    }

    #[test]
    fn eviction_never_touches_non_terminal_or_current() {
        let store = TransactionStore::new(2);
        let committed = terminal_tx(TransactionState::Committed);
        let committed_id = committed.id();
        store.upsert(committed);

        let in_flight = Transaction::new(Source::Test, "", "", Dummy);
        let in_flight_id = in_flight.id();
        store.upsert(in_flight);

        for _ in 0..5 {
            store.upsert(terminal_tx(TransactionState::Failed));
        }

        assert!(store.get(committed_id).is_some());
        assert!(store.get(in_flight_id).is_some());
    }

    #[test]
    fn pagination_covers_every_item_exactly_once() {
        let store = TransactionStore::new(1000);
        let mut ids = Vec::new();
        for _ in 0..25 {
            let tx = terminal_tx(TransactionState::Failed);
            ids.push(tx.id());
            store.upsert(tx);
        }

        let mut collected = Vec::new();
        let mut token = PageToken::start();
        loop {
            let page = store.list(token, 7, StateFilter::Any, SourceFilter::Any);
            collected.extend(page.items.iter().map(|t| t.id()));
            match page.next_page_token {
                Some(t) => token = t,
                None => break,
            }
        }

        assert_eq!(collected, ids);
    }

    #[test]
    fn clear_retains_current_regardless_of_keep_last() {
        let store = TransactionStore::new(1000);
        let current = terminal_tx(TransactionState::Committed);
        let current_id = current.id();
        store.upsert(current);
        for _ in 0..4 {
            store.upsert(terminal_tx(TransactionState::Failed));
        }

        let removed = store.clear(0);
        assert_eq!(removed, 4);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_current().unwrap().id(), current_id);
    }

    #[test]
    fn unrecognized_state_filter_matches_nothing() {
        let store = TransactionStore::new(10);
        store.upsert(terminal_tx(TransactionState::Failed));
        let filter: StateFilter = "bogus".parse().unwrap();
        let page = store.list(PageToken::start(), 10, filter, SourceFilter::Any);
        assert!(page.items.is_empty());
    }
}
