//! Set of non-overlapping key ranges associated with arbitrary per-range
//! data, used by `IndexLocker` to track which parts of a sorted index are
//! currently range-locked for a scan (§4.3 "range-lock via the index
//! locker's locksForScan").

use std::collections::BTreeMap;
use std::ops::Bound;

use common::bytes::Bytes;

pub struct KeyRanges<T> {
    /// Map of the 'start_key' mapped to a (end_key, data) tuple.
    ranges: BTreeMap<Bytes, (Bytes, T)>,
}

#[derive(Debug, PartialEq)]
pub struct KeyRangesItem<'a, T> {
    pub start_key: &'a Bytes,
    pub end_key: &'a Bytes,
    pub value: &'a T,
}

impl<T: Default + Clone> KeyRanges<T> {
    pub fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Mutates all the data associated with all ranges between start_key and
    /// end_key.
    /// - If there doesn't exist a contiguous set of ranges spanning
    ///   `[start_key, end_key)`, new ranges with `T::default()` are created
    ///   to fill the gap and passed to `f`.
    /// - If `[start_key, end_key)` only partially overlaps an existing
    ///   range, the existing range is split along the new range's
    ///   boundaries. The first split inherits the existing range's data;
    ///   later splits clone it.
    /// - If `f` returns `false` for a range, that range is dropped instead
    ///   of kept (used to release a lock once its reference count reaches
    ///   zero).
    pub fn range<S: Into<Bytes>, E: Into<Bytes>, F: FnMut(&mut T) -> bool>(
        &mut self,
        start_key: S,
        end_key: E,
        mut f: F,
    ) {
        let mut start_key = start_key.into();
        let end_key = end_key.into();

        let lower_bound = {
            if let Some((key, _)) = self
                .ranges
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(&start_key[..])))
                .next_back()
            {
                Bound::Included(key.clone())
            } else if let Some((key, _)) = self.ranges.iter().next() {
                Bound::Included(key.clone())
            } else {
                Bound::Unbounded
            }
        };

        let mut add_ranges = vec![];
        let mut delete_keys = vec![];

        let mut iter = self.ranges.range_mut((lower_bound, Bound::Unbounded));
        while let Some((cur_start_key, (cur_end_key, v))) = iter.next() {
            let cur_end_key: &Bytes = cur_end_key;

            // [cur_start_key] [cur_end_key] [start_key] [end_key]
            if *cur_end_key <= start_key {
                continue;
            }

            // [start_key] [end_key] [cur_start_key] [cur_end_key]
            if *cur_start_key >= end_key {
                break;
            }

            let mut equal_cur = true;

            // Maybe insert an entry before the current entry.
            if start_key < *cur_start_key {
                let new_start_key = start_key.clone();
                let new_end_key = cur_start_key.clone();
                let mut new_value = T::default();

                if f(&mut new_value) {
                    add_ranges.push((new_start_key, (new_end_key, new_value)));
                }

                start_key = cur_start_key.clone();
            } else if start_key > *cur_start_key {
                // Must truncate the current entry at 'start_key' and insert a new entry.
                {
                    delete_keys.push(cur_start_key.clone());

                    let new_start_key = cur_start_key.clone();
                    let new_end_key = start_key.clone();
                    let new_value = v.clone();
                    add_ranges.push((new_start_key, (new_end_key, new_value)));
                }

                {
                    let new_start_key = start_key.clone();
                    let new_end_key = cur_end_key.clone();
                    let mut new_value = v.clone();
                    if f(&mut new_value) {
                        add_ranges.push((new_start_key, (new_end_key, new_value)));
                    }
                }

                equal_cur = false;
            }

            if end_key < *cur_end_key {
                // Split the current entry into two entries.
                {
                    delete_keys.push(cur_start_key.clone());

                    let new_start_key = start_key.clone();
                    let new_end_key = end_key.clone();
                    let mut new_value = v.clone();
                    if f(&mut new_value) {
                        add_ranges.push((new_start_key, (new_end_key, new_value)));
                    }
                }

                {
                    let new_start_key = end_key.clone();
                    let new_end_key = cur_end_key.clone();
                    let new_value = v.clone();
                    add_ranges.push((new_start_key, (new_end_key, new_value)));
                }

                equal_cur = false;
            }

            if equal_cur {
                if !f(v) {
                    delete_keys.push(cur_start_key.clone());
                }
            }

            start_key = cur_end_key.clone();
        }

        if start_key < end_key {
            let mut new_value = T::default();
            if f(&mut new_value) {
                add_ranges.push((start_key, (end_key, new_value)));
            }
        }

        for key in delete_keys {
            self.ranges.remove(&key);
        }

        for (key, value) in add_ranges {
            self.ranges.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = KeyRangesItem<T>> {
        self.ranges
            .iter()
            .map(|(start_key, (end_key, value))| KeyRangesItem {
                start_key,
                end_key,
                value,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlaps_test() {
        let mut r = KeyRanges::<String>::new();

        r.range("a", "c", |s| {
            s.push('1');
            true
        });

        assert_eq!(
            &r.iter().collect::<Vec<_>>(),
            &[KeyRangesItem {
                start_key: &"a".into(),
                end_key: &"c".into(),
                value: &"1".into()
            }]
        );

        r.range("a", "b", |s| {
            s.push('2');
            true
        });

        assert_eq!(
            &r.iter().collect::<Vec<_>>(),
            &[
                KeyRangesItem {
                    start_key: &"a".into(),
                    end_key: &"b".into(),
                    value: &"12".into()
                },
                KeyRangesItem {
                    start_key: &"b".into(),
                    end_key: &"c".into(),
                    value: &"1".into()
                }
            ]
        );

        r.range("c", "f", |s| {
            s.push('3');
            true
        });

        assert_eq!(r.iter().count(), 3);
    }

    #[test]
    fn dropping_a_range_removes_it() {
        let mut r = KeyRanges::<u32>::new();

        r.range("a", "z", |v| {
            *v += 1;
            true
        });
        assert_eq!(r.iter().count(), 1);

        r.range("a", "z", |v| {
            *v -= 1;
            *v > 0
        });
        assert_eq!(r.iter().count(), 0);
    }
}
