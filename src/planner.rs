use crate::error::PlanError;
use crate::model::{CategoryCount, PageRequest};

/// Split a category's result set into consecutive windows of `page_size`.
///
/// Full windows come first; a short trailing window carries the remainder and is
/// omitted when `total` is an exact multiple. An empty category yields a single
/// zero-size probe at offset 0.
pub fn plan(category_id: &str, total: u64, page_size: u64) -> Result<Vec<PageRequest>, PlanError> {
    if page_size == 0 {
        return Err(PlanError::ZeroPageSize);
    }

    let window = |page_size, offset| PageRequest {
        category_id: category_id.to_string(),
        page_size,
        offset,
    };

    if total == 0 {
        return Ok(vec![window(0, 0)]);
    }

    let full = total / page_size;
    let remainder = total - full * page_size;

    let mut pages: Vec<PageRequest> = (0..full).map(|i| window(page_size, i * page_size)).collect();
    if remainder > 0 {
        pages.push(window(remainder, full * page_size));
    }
    Ok(pages)
}

/// Plan every category in order.
pub fn plan_all(counts: &[CategoryCount], page_size: u64) -> Result<Vec<PageRequest>, PlanError> {
    let mut pages = Vec::new();
    for count in counts {
        pages.extend(plan(&count.category_id, count.total, page_size)?);
    }
    Ok(pages)
}

/// Group keys into fixed-size batches for stock lookups. Keys are sorted first so
/// the same pending set always yields the same chunks.
pub fn chunk_keys<I>(keys: I, chunk_size: usize) -> Result<Vec<Vec<String>>, PlanError>
where
    I: IntoIterator<Item = String>,
{
    if chunk_size == 0 {
        return Err(PlanError::ZeroChunkSize);
    }
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    Ok(keys.chunks(chunk_size).map(<[String]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(total: u64, page_size: u64) {
        let pages = plan("c", total, page_size).unwrap();
        if total == 0 {
            assert_eq!(pages.len(), 1);
            assert!(pages[0].is_probe());
            return;
        }
        let mut cursor = 0;
        for p in &pages {
            assert_eq!(p.offset, cursor, "gap or overlap at {} for {}/{}", cursor, total, page_size);
            assert!(p.page_size > 0);
            cursor = p.end();
        }
        assert_eq!(cursor, total);
        assert_eq!(pages.len() as u64, total.div_ceil(page_size));
    }

    #[test]
    fn windows_partition_the_result_set() {
        for total in [0, 1, 7, 999, 1000, 1001, 2500, 3000] {
            for page_size in [1, 3, 1000, 5000] {
                assert_partition(total, page_size);
            }
        }
    }

    #[test]
    fn paint_category_three_windows() {
        let pages = plan("paint", 2500, 1000).unwrap();
        let shape: Vec<(u64, u64)> = pages.iter().map(|p| (p.offset, p.page_size)).collect();
        assert_eq!(shape, vec![(0, 1000), (1000, 1000), (2000, 500)]);
        assert!(pages.iter().all(|p| p.category_id == "paint"));
    }

    #[test]
    fn exact_multiple_has_no_trailing_window() {
        let pages = plan("tools", 3000, 1000).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.last().unwrap().offset, 2000);
        assert_eq!(pages.last().unwrap().page_size, 1000);
    }

    #[test]
    fn empty_category_yields_probe() {
        let pages = plan("empty", 0, 1000).unwrap();
        assert_eq!(
            pages,
            vec![PageRequest {
                category_id: "empty".into(),
                page_size: 0,
                offset: 0
            }]
        );
    }

    #[test]
    fn zero_page_size_rejected() {
        assert!(matches!(plan("c", 10, 0), Err(PlanError::ZeroPageSize)));
    }

    #[test]
    fn plan_all_keeps_category_order() {
        let counts = vec![
            CategoryCount { category_id: "a".into(), total: 3 },
            CategoryCount { category_id: "b".into(), total: 0 },
        ];
        let pages = plan_all(&counts, 2).unwrap();
        let ids: Vec<&str> = pages.iter().map(|p| p.category_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a", "b"]);
    }

    #[test]
    fn chunks_are_sorted_and_bounded() {
        let keys = ["d", "a", "c", "b", "e"].map(String::from);
        let chunks = chunk_keys(keys, 2).unwrap();
        assert_eq!(
            chunks,
            vec![vec!["a".to_string(), "b".into()], vec!["c".into(), "d".into()], vec!["e".into()]]
        );
        assert!(chunk_keys(Vec::<String>::new(), 7).unwrap().is_empty());
        assert!(matches!(chunk_keys(vec!["a".to_string()], 0), Err(PlanError::ZeroChunkSize)));
    }
}
