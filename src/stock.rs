use std::collections::BTreeMap;

use crate::model::{ProductKey, StockSample, StockTotal};

/// Sum stock levels per key across every store and batch. A missing level
/// counts as zero, and a key seen only with missing levels still gets an entry.
pub fn aggregate<I>(samples: I) -> BTreeMap<ProductKey, u64>
where
    I: IntoIterator<Item = StockSample>,
{
    let mut totals: BTreeMap<ProductKey, u64> = BTreeMap::new();
    for sample in samples {
        let entry = totals.entry(sample.key).or_insert(0);
        *entry = entry.saturating_add(sample.level.unwrap_or(0));
    }
    totals
}

pub fn into_totals(totals: BTreeMap<ProductKey, u64>) -> Vec<StockTotal> {
    totals
        .into_iter()
        .map(|(key, total)| StockTotal { key, total })
        .collect()
}
