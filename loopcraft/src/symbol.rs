// Symbol interning for the order-N model.
//
// A symbol is the sorted set of tags starting at one grid step. Tables key on
// small integer ids instead of tag vectors; `SymbolTable` is the
// bidirectional map, built once per corpus and persisted with the table.
// Ids are handed out in first-seen order, which keeps builds reproducible.

use crate::pattern::Tag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Interned symbol id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tag-set ↔ id table. Serialized as the list of tag sets, indexed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Vec<Tag>>", into = "Vec<Vec<Tag>>")]
pub struct SymbolTable {
    symbols: Vec<Vec<Tag>>,
    index: HashMap<Vec<Tag>, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `tags`, allocating one on first sight. `tags` must already be
    /// sorted and de-duplicated (as produced by the quantizer).
    pub fn intern(&mut self, tags: &[Tag]) -> SymbolId {
        if let Some(&id) = self.index.get(tags) {
            return id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(tags.to_vec());
        self.index.insert(tags.to_vec(), id);
        id
    }

    pub fn get(&self, tags: &[Tag]) -> Option<SymbolId> {
        self.index.get(tags).copied()
    }

    /// Tags behind an id. Panics on an id not issued by this table.
    pub fn resolve(&self, id: SymbolId) -> &[Tag] {
        &self.symbols[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// `kick/snare`-style label for logs and dumps.
    pub fn label(&self, id: SymbolId) -> String {
        self.resolve(id)
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn context_label(&self, context: &[SymbolId]) -> String {
        context
            .iter()
            .map(|&id| self.label(id))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<Vec<Vec<Tag>>> for SymbolTable {
    fn from(symbols: Vec<Vec<Tag>>) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, tags)| (tags.clone(), SymbolId(i as u32)))
            .collect();
        SymbolTable { symbols, index }
    }
}

impl From<SymbolTable> for Vec<Vec<Tag>> {
    fn from(table: SymbolTable) -> Self {
        table.symbols
    }
}
