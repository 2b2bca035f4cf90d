use std::collections::HashSet;
use std::hash::Hash;

/// Keys in `candidates` not yet confirmed in `done`.
pub fn pending<K>(candidates: &HashSet<K>, done: &HashSet<K>) -> HashSet<K>
where
    K: Eq + Hash + Clone,
{
    candidates.difference(done).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn removes_confirmed_keys() {
        assert_eq!(pending(&set(&["a", "b"]), &set(&["a"])), set(&["b"]));
    }

    #[test]
    fn empty_inputs() {
        assert!(pending(&set(&[]), &set(&["a"])).is_empty());
        assert_eq!(pending(&set(&["a"]), &set(&[])), set(&["a"]));
    }

    #[test]
    fn second_pass_after_confirming_is_empty() {
        let candidates = set(&["a", "b", "c"]);
        let mut done = set(&["b"]);
        let first = pending(&candidates, &done);
        done.extend(first);
        assert!(pending(&candidates, &done).is_empty());
    }

    #[test]
    fn inputs_untouched() {
        let candidates = set(&["a", "b"]);
        let done = set(&["a"]);
        let _ = pending(&candidates, &done);
        assert_eq!(candidates.len(), 2);
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn works_for_non_string_keys() {
        let candidates: HashSet<u32> = [1, 2, 3].into();
        let done: HashSet<u32> = [2].into();
        assert_eq!(pending(&candidates, &done), [1, 3].into());
    }
}
