use std::{
    borrow::Borrow,
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};

/// Opaque key of a tradable instrument. Compared by exact string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstrumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for InstrumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for InstrumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The instruments currently held.
///
/// Insertion order is preserved so that proposals built from a holding set are reproducible, and
/// duplicates are dropped on every path in, including deserialization of `{ "stocks": [...] }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HoldingSetRepr", into = "HoldingSetRepr")]
pub struct HoldingSet {
    stocks: Vec<InstrumentId>,
}

impl HoldingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the instrument was already held.
    pub fn insert(&mut self, id: InstrumentId) -> bool {
        if self.contains(&id) {
            return false;
        }

        self.stocks.push(id);
        true
    }

    pub fn contains(&self, id: &InstrumentId) -> bool {
        self.stocks.contains(id)
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentId> + '_ {
        self.stocks.iter()
    }

    pub fn as_slice(&self) -> &[InstrumentId] {
        &self.stocks
    }

    pub fn truncate(&mut self, len: usize) {
        self.stocks.truncate(len);
    }
}

impl FromIterator<InstrumentId> for HoldingSet {
    fn from_iter<I: IntoIterator<Item = InstrumentId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl<'a> IntoIterator for &'a HoldingSet {
    type Item = &'a InstrumentId;
    type IntoIter = std::slice::Iter<'a, InstrumentId>;

    fn into_iter(self) -> Self::IntoIter {
        self.stocks.iter()
    }
}

impl Display for HoldingSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, id) in self.stocks.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "]")
    }
}

#[derive(Serialize, Deserialize)]
struct HoldingSetRepr {
    #[serde(default)]
    stocks: Vec<InstrumentId>,
}

impl From<HoldingSetRepr> for HoldingSet {
    fn from(repr: HoldingSetRepr) -> Self {
        repr.stocks.into_iter().collect()
    }
}

impl From<HoldingSet> for HoldingSetRepr {
    fn from(set: HoldingSet) -> Self {
        Self { stocks: set.stocks }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    #[serde(default)]
    pub name: Option<String>,
    // Static pre-ranking, lower is better. Unranked instruments sort after ranked ones.
    #[serde(default)]
    pub rank: Option<u32>,
}

/// Every instrument allowed into the portfolio, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct CandidateUniverse {
    instruments: BTreeMap<InstrumentId, InstrumentMeta>,
}

impl CandidateUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: InstrumentId, meta: InstrumentMeta) {
        self.instruments.insert(id, meta);
    }

    pub fn get(&self, id: &InstrumentId) -> Option<&InstrumentMeta> {
        self.instruments.get(id)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Candidates not already held, ordered by static rank (unranked last) and then id, and cut
    /// down to at most `cap` entries.
    pub fn eligible(&self, holdings: &HoldingSet, cap: Option<usize>) -> Vec<InstrumentId> {
        let mut pool = self
            .instruments
            .iter()
            .filter(|(id, _)| !holdings.contains(id))
            .collect::<Vec<_>>();

        pool.sort_by(|(id_a, meta_a), (id_b, meta_b)| {
            let rank_a = meta_a.rank.unwrap_or(u32::MAX);
            let rank_b = meta_b.rank.unwrap_or(u32::MAX);
            rank_a.cmp(&rank_b).then_with(|| id_a.cmp(id_b))
        });

        pool.into_iter()
            .take(cap.unwrap_or(usize::MAX))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl FromIterator<(InstrumentId, InstrumentMeta)> for CandidateUniverse {
    fn from_iter<I: IntoIterator<Item = (InstrumentId, InstrumentMeta)>>(iter: I) -> Self {
        Self {
            instruments: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &HoldingSet) -> Vec<&str> {
        set.iter().map(InstrumentId::as_str).collect()
    }

    #[test]
    fn holding_set_drops_duplicates_and_keeps_order() {
        let set = ["B", "A", "B", "C", "A"]
            .into_iter()
            .map(InstrumentId::from)
            .collect::<HoldingSet>();
        assert_eq!(ids(&set), ["B", "A", "C"]);
    }

    #[test]
    fn holding_set_json_shape() {
        let set: HoldingSet =
            serde_json::from_str(r#"{ "stocks": ["005930", "000660", "005930"] }"#).unwrap();
        assert_eq!(ids(&set), ["005930", "000660"]);

        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!({ "stocks": ["005930", "000660"] }));

        let empty: HoldingSet = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn eligible_excludes_holdings_and_applies_ranking() {
        let ranked = |rank| InstrumentMeta {
            name: None,
            rank: Some(rank),
        };
        let universe = [
            ("D", InstrumentMeta::default()),
            ("C", ranked(2)),
            ("A", ranked(1)),
            ("B", ranked(2)),
            ("E", InstrumentMeta::default()),
        ]
        .into_iter()
        .map(|(id, meta)| (InstrumentId::from(id), meta))
        .collect::<CandidateUniverse>();

        let holdings = [InstrumentId::from("A")].into_iter().collect::<HoldingSet>();

        let all = universe.eligible(&holdings, None);
        assert_eq!(
            all.iter().map(InstrumentId::as_str).collect::<Vec<_>>(),
            ["B", "C", "D", "E"]
        );

        let capped = universe.eligible(&holdings, Some(3));
        assert_eq!(
            capped.iter().map(InstrumentId::as_str).collect::<Vec<_>>(),
            ["B", "C", "D"]
        );
    }
}
