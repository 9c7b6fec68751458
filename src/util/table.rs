//! 编译期静态表工具
//!
//! 钩子表和主机命令表都在编译期排好序, 运行时不再做任何分配或排序

/// 在 `const fn` 中对数组做稳定插入排序
///
/// 键相等的元素保持原有 (注册) 顺序
///
/// # Example
/// ```ignore
/// const fn sorted(mut entries: [Entry; N]) -> [Entry; N] {
///     const_insertion_sort!(entries, |e| e.priority);
///     entries
/// }
/// ```
#[macro_export]
macro_rules! const_insertion_sort {
    ($arr:ident, |$e:ident| $key:expr) => {{
        let mut i = 1;
        while i < $arr.len() {
            let mut j = i;
            while j > 0 && { let $e = &$arr[j - 1]; $key } > { let $e = &$arr[j]; $key } {
                let tmp = $arr[j - 1];
                $arr[j - 1] = $arr[j];
                $arr[j] = tmp;
                j -= 1;
            }
            i += 1;
        }
    }};
}

/// 统计宏参数个数 (用于推导静态表长度)
#[doc(hidden)]
#[macro_export]
macro_rules! count_items {
    () => { 0usize };
    ($head:tt $($tail:tt)*) => { 1usize + $crate::count_items!($($tail)*) };
}

#[cfg(test)]
mod tests {
    #[derive(Clone, Copy)]
    struct Item {
        key: i32,
        tag: char,
    }

    const fn sorted<const N: usize>(mut items: [Item; N]) -> [Item; N] {
        const_insertion_sort!(items, |e| e.key);
        items
    }

    #[test]
    fn test_sort_is_stable() {
        const ITEMS: [Item; 5] = sorted([
            Item { key: 10, tag: 'a' },
            Item { key: 5, tag: 'b' },
            Item { key: 10, tag: 'c' },
            Item { key: -1, tag: 'd' },
            Item { key: 5, tag: 'e' },
        ]);
        let tags: Vec<char> = ITEMS.iter().map(|i| i.tag).collect();
        assert_eq!(tags, vec!['d', 'b', 'e', 'a', 'c']);
    }

    #[test]
    fn test_count_items() {
        assert_eq!(count_items!(a b c), 3);
        assert_eq!(count_items!(), 0);
    }
}
